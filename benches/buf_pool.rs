use pktburst::buf::Buf;
use pktburst::buf_mmap::BufMmap;
use pktburst::buf_pool::BufPool;

use criterion::{criterion_group, criterion_main, Criterion};

const NUM: usize = 10000;
const BURST: usize = 32;

fn getput(pool: &BufPool, bufs: &mut Vec<BufMmap>) {
    let _r = pool.get(bufs, NUM);
    let _r = pool.put(bufs);
}

fn burst(pool: &BufPool, bufs: &mut Vec<BufMmap>, payload: &[u8]) {
    pool.get(bufs, BURST);
    for buf in bufs.iter_mut() {
        let _r = buf.append(payload);
    }
    pool.put(bufs);
}

fn alloc_free(pool: &BufPool) {
    if let Ok(buf) = pool.alloc() {
        pool.free(buf);
    }
}

fn test(c: &mut Criterion) {
    let pool = match BufPool::create(NUM, 250, 2048) {
        Ok(pool) => pool,
        Err(err) => panic!("{:?}", err),
    };
    let mut bufs = Vec::with_capacity(NUM);

    c.bench_function("getput", |b| b.iter(|| getput(&pool, &mut bufs)));
    c.bench_function("burst", |b| {
        b.iter(|| burst(&pool, &mut bufs, b"Hello test!"))
    });
    c.bench_function("alloc_free", |b| b.iter(|| alloc_free(&pool)));
}

criterion_group!(benches, test);
criterion_main!(benches);
