use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kmerfold::libs::alphabet::Alphabet;
use kmerfold::libs::index::{BuildOptions, IndexBuilder};
use kmerfold::libs::kmer::{Extractor, KmerParams, SpacedPattern};
use kmerfold::libs::matcher::{Matcher, SearchOptions};
use kmerfold::libs::seqdb::SeqDb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random sequences over the twenty standard amino acids
fn random_db(alphabet: &Alphabet, n: usize, len: usize, seed: u64) -> SeqDb {
    let letters = b"ACDEFGHIKLMNPQRSTVWY";
    let mut rng = StdRng::seed_from_u64(seed);
    let mut db = SeqDb::new();
    for i in 0..n {
        let text: Vec<u8> = (0..len)
            .map(|_| letters[rng.gen_range(0..letters.len())])
            .collect();
        db.push_text(alphabet, &format!("s{}", i), &text).unwrap();
    }
    db
}

fn bench_build(c: &mut Criterion) {
    let alphabet = Alphabet::blosum62().clone();
    let db = random_db(&alphabet, 2000, 300, 1);
    let extractor = Extractor::new(alphabet, KmerParams::default()).unwrap();
    let builder = IndexBuilder::new(extractor, BuildOptions::default());

    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(db.total_symbols() as u64));
    group.bench_function("in_memory", |b| {
        b.iter(|| black_box(builder.build_in_memory(&db)))
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let alphabet = Alphabet::blosum62().clone();
    let db = random_db(&alphabet, 2000, 300, 1);
    let queries = random_db(&alphabet, 50, 300, 2);

    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(queries.len() as u64));

    for (label, params) in [
        (
            "k4",
            KmerParams {
                pattern: SpacedPattern::contiguous(4).unwrap(),
                reduced_size: 0,
            },
        ),
        (
            "k6_alph13",
            KmerParams {
                pattern: SpacedPattern::contiguous(6).unwrap(),
                reduced_size: 13,
            },
        ),
        (
            "spaced_alph13",
            KmerParams {
                pattern: SpacedPattern::parse("1101011").unwrap(),
                reduced_size: 13,
            },
        ),
    ] {
        let extractor = Extractor::new(alphabet.clone(), params).unwrap();
        let index = IndexBuilder::new(extractor, BuildOptions::default()).build_in_memory(&db);
        let matcher = Matcher::new(&index, SearchOptions::default());

        group.bench_with_input(BenchmarkId::new("queries", label), &queries, |b, queries| {
            b.iter(|| {
                let mut n = 0;
                for q in queries.iter() {
                    n += matcher.search_symbols(q.id(), q.symbols()).len();
                }
                black_box(n)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
