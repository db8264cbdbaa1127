/// Like [`assert_eq!`] but returns a [`crate::error::BitGenericError`] instead of panicking,
/// for use in functions returning [`crate::error::BitResult`].
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        let (left, right) = (&$left, &$right);
        ensure!(left == right, "assertion failed: `(left == right)`\n  left: `{:?}`\n right: `{:?}`", left, right);
    }};
    ($left:expr, $right:expr, $($arg:tt)+) => {{
        let (left, right) = (&$left, &$right);
        ensure!(left == right, $($arg)+);
    }};
}
