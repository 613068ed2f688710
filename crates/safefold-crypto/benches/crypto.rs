use safefold_crypto::{derive, generate_file_key, FileCipher};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_seal_file(bencher: divan::Bencher, size: usize) {
    let cipher = FileCipher::default();
    let key = generate_file_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cipher
                .seal_bytes(divan::black_box(key.as_bytes()), divan::black_box(&data))
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_open_file(bencher: divan::Bencher, size: usize) {
    let cipher = FileCipher::default();
    let key = generate_file_key();
    let envelope = cipher.seal_bytes(key.as_bytes(), &make_data(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cipher
                .open_bytes(divan::black_box(key.as_bytes()), divan::black_box(&envelope))
                .unwrap()
        });
}

#[divan::bench(args = [10_000, 200_000])]
fn bench_kdf(bencher: divan::Bencher, iterations: u32) {
    let salt = [0x5Au8; 32];
    bencher.bench(|| derive(divan::black_box(b"Secret123!"), &salt, iterations, 32).unwrap());
}

fn main() {
    divan::main();
}
