use proc_macro2::TokenStream;
use quote::quote;
use syn::*;

/// Derives `BitObject` for an enum whose variants each wrap a type that
/// already implements `BitObject`, by dispatching `obj_type`/`oid` to the
/// active variant.
#[proc_macro_derive(BitObject)]
pub fn derive_bit_object(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let data = match input.data {
        Data::Enum(data) => data,
        _ => panic!("BitObject can only be derived for enums"),
    };

    let obj_type_arms = data.variants.iter().map(|variant| {
        let variant_name = &variant.ident;
        quote! { Self::#variant_name(x) => x.obj_type(), }
    });

    let expanded = quote! {
        impl #impl_generics crate::obj::BitObject for #name #ty_generics #where_clause {
            fn obj_type(&self) -> crate::obj::BitObjType {
                match self {
                    #(#obj_type_arms)*
                }
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

/// Derives `quickcheck::Arbitrary` for a struct by generating each field
/// independently. Used by the object-model round-trip properties.
#[proc_macro_derive(BitArbitrary)]
pub fn derive_bit_arbitrary(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    let name = input.ident;
    let generics = add_trait_bounds(input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let arbitrary = generate_arbitrary_fields(&input.data);

    let expanded = quote! {
        impl #impl_generics quickcheck::Arbitrary for #name #ty_generics #where_clause {
            fn arbitrary(g: &mut quickcheck::Gen) -> Self {
                #arbitrary
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

fn generate_arbitrary_fields(data: &Data) -> TokenStream {
    match data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let recurse = fields.named.iter().map(|f| {
                    let name = &f.ident;
                    quote! { #name: quickcheck::Arbitrary::arbitrary(g) }
                });
                quote! { Self { #(#recurse, )* } }
            }
            Fields::Unnamed(fields) => {
                let recurse = fields.unnamed.iter().map(|_f| {
                    quote! { quickcheck::Arbitrary::arbitrary(g) }
                });
                quote! { Self(#(#recurse, )*) }
            }
            Fields::Unit => quote! { Self },
        },
        Data::Enum(_) | Data::Union(_) => unimplemented!("BitArbitrary only supports structs"),
    }
}

fn add_trait_bounds(mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            type_param.bounds.push(parse_quote!(quickcheck::Arbitrary));
        }
    }
    generics
}
