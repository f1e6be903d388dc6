use criterion::{black_box, criterion_group, criterion_main, Criterion};
use histsplit::collective::SingleWorker;
use histsplit::data::{GHistIndexMatrix, GradStats, GradientPair, HistogramCuts};
use histsplit::grower::ExpandEntry;
use histsplit::histogram::{build_hist, HistBuffer};
use histsplit::tree::RegTree;
use histsplit::{HistUpdater, TrainParam};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const N_ROWS: usize = 100_000;
const N_FEATURES: usize = 20;
const N_BINS: usize = 64;

fn make_data() -> (GHistIndexMatrix, Vec<GradientPair>) {
    let mut rng = StdRng::seed_from_u64(0);
    let feature_cuts: Vec<Vec<f32>> = (0..N_FEATURES)
        .map(|_| (1..=N_BINS).map(|b| b as f32).collect())
        .collect();
    let cuts = HistogramCuts::from_feature_cuts(&feature_cuts, &vec![0.0; N_FEATURES]).unwrap();
    let bins: Vec<u32> = (0..N_ROWS * N_FEATURES)
        .map(|_| rng.gen_range(0..N_BINS as u32))
        .collect();
    let gmat = GHistIndexMatrix::from_dense(cuts, &bins, N_FEATURES).unwrap();
    let gpair = (0..N_ROWS)
        .map(|_| GradientPair::new(rng.gen_range(-1.0..1.0), rng.gen_range(0.1..1.0)))
        .collect();
    (gmat, gpair)
}

pub fn histogram_benchmarks(c: &mut Criterion) {
    let (gmat, gpair) = make_data();
    let rows: Vec<usize> = (0..N_ROWS).collect();
    let pool = rayon::ThreadPoolBuilder::new().build().unwrap();
    let mut hist = vec![GradStats::<f64>::default(); gmat.cut.total_bins()];
    let mut buffer = HistBuffer::<f64>::default();
    buffer.init(gmat.cut.total_bins());

    c.bench_function("build_hist", |b| {
        b.iter(|| {
            build_hist(
                black_box(&gpair),
                black_box(&rows),
                black_box(&gmat),
                &mut hist,
                &mut buffer,
                &pool,
            )
        })
    });

    let tree = RegTree::new();
    let root = ExpandEntry::new(0, 0);
    let mut updater: HistUpdater<f64> = HistUpdater::new(TrainParam::default(), Arc::new(SingleWorker)).unwrap();
    updater.init_data(&gmat, &gpair).unwrap();
    updater.build_histograms_depth_wise(&[root], &gmat, &tree, &gpair).unwrap();
    updater.init_new_node(0, &gmat, &gpair, &tree).unwrap();

    c.bench_function("evaluate_splits", |b| {
        b.iter(|| updater.evaluate_splits(black_box(&[root]), &gmat, &tree).unwrap())
    });
}

criterion_group!(benches, histogram_benchmarks);
criterion_main!(benches);
