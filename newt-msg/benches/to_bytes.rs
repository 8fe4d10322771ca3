use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

#[path = "bench_input.rs"]
mod bench_input;
use newt_msg::{tcp, TryIntoBytes};

fn message_to_bytes(c: &mut Criterion) {
  let mut group = c.benchmark_group("msg/to_bytes");
  group.measurement_time(std::time::Duration::from_secs(5));

  for inp in bench_input::inputs() {
    group.bench_with_input(BenchmarkId::new("udp", format!("{:?}", inp)), &inp, |b, inp| {
           b.iter_batched(|| inp.get_msg(),
                          |m| m.try_into_bytes().unwrap(),
                          BatchSize::SmallInput)
         });

    group.bench_with_input(BenchmarkId::new("tcp", format!("{:?}", inp)), &inp, |b, inp| {
           b.iter_batched(|| inp.get_msg(),
                          |m| tcp::to_bytes(&m).unwrap(),
                          BatchSize::SmallInput)
         });
  }

  group.finish();
}

criterion_group!(benches, message_to_bytes);
criterion_main!(benches);
