use bitcore::obj::{BitObjKind, Blob};
use bitcore::pack::writer::{PackWriter, PackWriterConfig};
use bitcore::pack::Pack;
use criterion::{criterion_group, criterion_main, Criterion};

fn similar_blobs(count: usize) -> Vec<BitObjKind> {
    let base = b"the quick brown fox jumps over the lazy dog\n".repeat(50);
    (0..count)
        .map(|i| {
            let mut bytes = base.clone();
            bytes.extend_from_slice(format!("unique trailing line {}\n", i).as_bytes());
            BitObjKind::Blob(Blob::new(bytes))
        })
        .collect()
}

pub fn bench_pack_write(c: &mut Criterion) {
    let objects = similar_blobs(200);
    let writer = PackWriter::new(PackWriterConfig::default());
    c.bench_function("pack_write_200_similar_blobs", |b| {
        b.iter(|| writer.write_to_vec(&objects).unwrap())
    });
}

pub fn bench_pack_read(c: &mut Criterion) {
    let objects = similar_blobs(200);
    let writer = PackWriter::new(PackWriterConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let pack_path = dir.path().join("bench.pack");
    let idx_path = dir.path().join("bench.idx");
    writer.write(&objects, &pack_path, &idx_path).unwrap();

    c.bench_function("pack_validate_200_similar_blobs", |b| {
        b.iter(|| {
            let pack = Pack::open(&pack_path, &idx_path).unwrap();
            pack.validate().unwrap();
        })
    });
}

criterion_group!(benches, bench_pack_write, bench_pack_read);
criterion_main!(benches);
