use cf_core::{FieldKey, IterSource, Record};
use cf_hist::{Axis, HistogramSpec, RunContext, TaskRunner};
use cf_select::{Cut, CutDimension, NamespaceBuilder, range_cuts};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn make_context(n_pt_bins: usize) -> RunContext {
    let mut ctx = RunContext::new();
    let vars = ctx.variables_mut();
    let status = vars.register_field(FieldKey::new("Candidates", "fKFSigBgStatus")).unwrap();
    let pt = vars.register_field(FieldKey::new("Candidates", "fKFPt")).unwrap();
    let mass = vars.register_field(FieldKey::new("Candidates", "fKFMassLc")).unwrap();
    let ratio = vars.register_expr("ptRatio", "Candidates.fKFPt / max(Candidates.fPtMother, 1e-3)").unwrap();

    let edges: Vec<f64> = (0..=n_pt_bins).map(|i| i as f64 * 24.0 / n_pt_bins as f64).collect();
    let entries = NamespaceBuilder::new()
        .dimension(
            CutDimension::from_cuts(
                "type",
                [Cut::equals(status, 1.0, "prompt"), Cut::equals(status, 2.0, "nonPrompt")],
            )
            .unwrap(),
        )
        .dimension(CutDimension::from_cuts("pt", range_cuts(pt, "pT_", &edges, 1).unwrap()).unwrap())
        .build()
        .unwrap();

    let mass_axis = Axis::new("m", 600, 1.98, 2.58).unwrap();
    ctx.add_histogram_all(&entries, &HistogramSpec::h1("hMass", mass_axis.clone(), mass)).unwrap();
    ctx.add_histogram_all(
        &entries,
        &HistogramSpec::h2("hMassVsRatio", (mass_axis, mass), (Axis::new("r", 50, 0.0, 1.0).unwrap(), ratio)),
    )
    .unwrap();
    ctx
}

fn make_records(n: usize) -> Vec<Record> {
    // Deterministic spread over all slices, no RNG.
    (0..n)
        .map(|i| {
            Record::new()
                .with("Candidates", "fKFSigBgStatus", (i % 3) as f64)
                .with("Candidates", "fKFPt", (i * 7 % 240) as f64 * 0.1)
                .with("Candidates", "fKFMassLc", 1.98 + (i * 11 % 600) as f64 * 0.001)
                .with("Candidates", "fPtMother", 30.0)
        })
        .collect()
}

fn bench_fill_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("cutflow_fill");
    let records = make_records(10_000);
    group.throughput(Throughput::Elements(records.len() as u64));

    for n_pt_bins in [2usize, 8, 24] {
        let ctx = make_context(n_pt_bins);
        group.bench_with_input(BenchmarkId::new("sequential", n_pt_bins), &records, |b, recs| {
            b.iter(|| {
                let result = TaskRunner::new(&ctx).run(IterSource::new(recs.iter().cloned())).unwrap();
                black_box(result.progress())
            })
        });
        group.bench_with_input(BenchmarkId::new("partitioned_4", n_pt_bins), &records, |b, recs| {
            b.iter(|| {
                let sources: Vec<_> =
                    recs.chunks(recs.len() / 4).map(|c| IterSource::new(c.to_vec())).collect();
                let result = TaskRunner::new(&ctx).run_partitioned(sources).unwrap();
                black_box(result.progress())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fill_loop);
criterion_main!(benches);
