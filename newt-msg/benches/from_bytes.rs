use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

#[path = "bench_input.rs"]
mod bench_input;
use newt_msg::{Message, TryFromBytes};

fn message_from_bytes(c: &mut Criterion) {
  let mut group = c.benchmark_group("msg/from_bytes");
  group.measurement_time(std::time::Duration::from_secs(5));

  for inp in bench_input::inputs() {
    group.bench_with_input(BenchmarkId::new("udp", format!("{:?}", inp)), &inp, |b, inp| {
           b.iter_batched(|| inp.get_bytes(),
                          |bytes| Message::try_from_bytes(bytes).unwrap(),
                          BatchSize::SmallInput)
         });
  }

  group.finish();
}

criterion_group!(benches, message_from_bytes);
criterion_main!(benches);
