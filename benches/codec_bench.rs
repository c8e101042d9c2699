use aar::archive::{Archive, ArchiveOptions};
use aar::crypto::{BlockCipher, Key, KEY_SIZE};
use aar::io_stream::{encode_payload, DEFAULT_IO_BUFFER_SIZE};
use aar::splice::{shift_range, DEFAULT_SPLICE_CHUNK_SIZE};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::Cursor;

fn bench_cipher(c: &mut Criterion) {
    let key = Key::new([0x11; KEY_SIZE]);
    let one = BlockCipher::new(&key, 1);
    let four = BlockCipher::new(&key, 4);
    let mut data = vec![0u8; 1024 * 1024];

    c.bench_function("encrypt_1mb_1_pass", |b| b.iter(|| one.encrypt_blocks(black_box(&mut data))));
    c.bench_function("encrypt_1mb_4_passes", |b| b.iter(|| four.encrypt_blocks(black_box(&mut data))));
}

fn bench_encode_payload(c: &mut Criterion) {
    let key = Key::new([0x22; KEY_SIZE]);
    let cipher = BlockCipher::new(&key, 1);
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("encode_payload_1mb", |b| {
        b.iter(|| {
            let mut sink = Vec::with_capacity(data.len());
            encode_payload(&mut black_box(&data[..]), &mut sink, &cipher, DEFAULT_IO_BUFFER_SIZE).unwrap();
        })
    });
}

fn bench_splice(c: &mut Criterion) {
    let base = vec![7u8; 4 * 1024 * 1024];

    c.bench_function("shift_range_4mb_forward", |b| {
        b.iter(|| {
            let mut buf = Cursor::new(base.clone());
            shift_range(&mut buf, 4096, 0, base.len() as u64, DEFAULT_SPLICE_CHUNK_SIZE).unwrap();
        })
    });
}

fn bench_delete_first_record(c: &mut Criterion) {
    let key = Key::new([0x33; KEY_SIZE]);
    let mut ar = Archive::create_in(Cursor::new(Vec::new()), &key, ArchiveOptions::default()).unwrap();
    for i in 0..16 {
        ar.append(&format!("file{i}.bin"), &vec![i as u8; 64 * 1024][..]).unwrap();
    }
    let template = ar.into_inner().into_inner();

    c.bench_function("delete_first_of_16", |b| {
        b.iter(|| {
            let mut ar = Archive::open_in(Cursor::new(template.clone()), &key, ArchiveOptions::default()).unwrap();
            ar.delete(0).unwrap();
        })
    });
}

criterion_group!(benches, bench_cipher, bench_encode_payload, bench_splice, bench_delete_first_record);
criterion_main!(benches);
