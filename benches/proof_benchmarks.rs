use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cti_zk_membership::{
    build_tree, merkle::IocBatchTree, CircuitHasher, ContributorProver, ContributorSet, Nonce,
    ProofInput, ZeroSubtreeTable, TREE_DEPTH,
};
use ethers::types::Address;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn contributors(count: usize) -> ContributorSet {
    ContributorSet::from_addresses((1..=count as u64).map(Address::from_low_u64_be)).unwrap()
}

fn bench_tree_build(c: &mut Criterion) {
    let hasher = CircuitHasher::new().unwrap();
    let table = ZeroSubtreeTable::new(TREE_DEPTH, &hasher).unwrap();

    let mut group = c.benchmark_group("contributor_tree_build");
    for count in [4usize, 64, 1024].iter() {
        let set = contributors(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(build_tree(&set, TREE_DEPTH, &table, &hasher).unwrap()))
        });
    }
    group.finish();
}

fn bench_poseidon(c: &mut Criterion) {
    let hasher = CircuitHasher::new().unwrap();
    let a = ark_bn254::Fr::from(0xAAAu64);
    let b = ark_bn254::Fr::from(42u64);
    c.bench_function("poseidon_hash2", |bench| {
        bench.iter(|| black_box(hasher.hash2(black_box(a), black_box(b))))
    });
}

fn bench_ioc_tree(c: &mut Criterion) {
    let iocs: Vec<String> = (0..1024).map(|i| format!("198.51.100.{}", i % 256)).collect();
    c.bench_function("ioc_batch_tree_1024", |b| {
        b.iter(|| black_box(IocBatchTree::from_iocs(&iocs[..]).unwrap()))
    });
}

fn bench_proof_generation(c: &mut Criterion) {
    let hasher = CircuitHasher::new().unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    let mut group = c.benchmark_group("membership_proof");
    group.sample_size(10);

    for depth in [8usize, TREE_DEPTH].iter() {
        let table = ZeroSubtreeTable::new(*depth, &hasher).unwrap();
        let set = contributors(16);
        let tree = build_tree(&set, *depth, &table, &hasher).unwrap();

        let mut prover = ContributorProver::new(*depth, hasher.clone());
        prover.generate_and_cache_keys(&mut rng).unwrap();

        group.bench_with_input(BenchmarkId::new("prove", depth), depth, |b, _| {
            b.iter(|| {
                let path = tree.proof(5).unwrap();
                let input = ProofInput::new(
                    path.address,
                    Nonce::random(&mut rng),
                    path,
                    tree.root(),
                    &hasher,
                );
                black_box(prover.generate_proof(input, &mut rng).unwrap())
            })
        });

        let path = tree.proof(5).unwrap();
        let input = ProofInput::new(path.address, Nonce::random(&mut rng), path, tree.root(), &hasher);
        let (proof, signals) = prover.generate_proof(input, &mut rng).unwrap();
        let verifier = prover.verifier().unwrap();
        group.bench_with_input(BenchmarkId::new("verify", depth), depth, |b, _| {
            b.iter(|| black_box(verifier.verify(&proof, &signals).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_poseidon,
    bench_tree_build,
    bench_ioc_tree,
    bench_proof_generation
);
criterion_main!(benches);
