use candle_nn::{VarBuilder, VarMap};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use neural_style as ns;
use ns::candle_core::{DType, Device, Tensor, Var};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

// Randomly initialized weights cost the same to evaluate as trained ones
fn random_vgg(selection: ns::LayerSelection) -> ns::Vgg19 {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    ns::Vgg19::new(vb, selection).unwrap()
}

fn shallow_layers() -> ns::LayerSelection {
    ns::LayerSelection::new(vec!["block1_conv1", "block2_conv1"], vec!["block2_conv2"]).unwrap()
}

fn test_image(dim: u32) -> ns::image::RgbImage {
    ns::image::RgbImage::from_fn(dim, dim, |x, y| {
        ns::image::Rgb([(x * 7) as u8, (y * 3) as u8, ((x ^ y) * 5) as u8])
    })
}

fn gram(c: &mut Criterion) {
    let mut group = c.benchmark_group("gram_matrix");

    for dim in [16usize, 32, 64, 128].iter() {
        let act = Tensor::randn(0f32, 1.0, (1, 64, *dim, *dim), &Device::Cpu).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(dim), &act, |b, act| {
            b.iter(|| black_box(ns::gram_matrix(act).unwrap()));
        });
    }
    group.finish();
}

fn loss_and_gradient(c: &mut Criterion) {
    static DIM: u32 = 16;

    let vgg = random_vgg(shallow_layers());
    let norm = ns::Normalization::default();

    let mut group = c.benchmark_group("loss_and_gradient");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM].iter() {
        let image = norm.to_tensor(&test_image(*dim), &Device::Cpu).unwrap();
        let targets = ns::TargetFeatures::from_images(&vgg, &image, &image).unwrap();
        let evaluator = ns::LossEvaluator::new(targets, ns::LossWeights::default());
        let working = Var::from_tensor(&image).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, _| {
            b.iter(|| black_box(evaluator.loss_and_gradient(&vgg, &working).unwrap()));
        });
    }
    group.finish();
}

fn session(c: &mut Criterion) {
    static DIM: u32 = 16;

    let vgg: Arc<dyn ns::FeatureExtractor> = Arc::new(random_vgg(shallow_layers()));
    let content = test_image(64);
    let style = test_image(48);

    let mut group = c.benchmark_group("session");
    group.sample_size(10);

    for dim in [DIM, 2 * DIM, 4 * DIM].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |b, &dim| {
            b.iter_custom(|iters| {
                let mut total_elapsed = Duration::new(0, 0);
                for _i in 0..iters {
                    let sess = ns::Session::builder()
                        .content_image(content.clone())
                        .style_image(style.clone())
                        .max_size(dim)
                        .iterations(10)
                        .extractor(Arc::clone(&vgg))
                        .build()
                        .unwrap();

                    let start = Instant::now();
                    black_box(sess.run(None).unwrap());
                    total_elapsed += start.elapsed();
                }

                total_elapsed
            });
        });
    }
    group.finish();
}

criterion_group!(benches, gram, loss_and_gradient, session);
criterion_main!(benches);
