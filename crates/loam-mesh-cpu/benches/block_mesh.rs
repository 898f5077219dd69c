use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use loam_map::{GenState, MapBlock, VoxelMap};
use loam_mesh_cpu::{MeshInput, build_block_mesh};
use loam_world::{BlockPos, ContentTable, WorldConfig};

fn generated_map(center: BlockPos) -> VoxelMap {
    let map = VoxelMap::new();
    let generator = WorldConfig::default().build_generator();
    let mut positions = vec![center];
    positions.extend(center.face_neighbors());
    for pos in positions {
        map.insert(MapBlock::from_nodes(
            pos,
            generator.generate(pos),
            GenState::Generated,
        ));
    }
    map
}

fn bench_surface_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_block_mesh");
    let content = ContentTable::builtin();
    let pos = BlockPos::new(0, 0, 0);
    let map = generated_map(pos);
    group.bench_function("surface_16x16x16", |b| {
        b.iter(|| {
            let input = MeshInput::gather(&map, pos).unwrap();
            black_box(build_block_mesh(&input, &content).unwrap());
        })
    });
    let deep = BlockPos::new(0, -3, 0);
    let map = generated_map(deep);
    group.bench_function("buried_16x16x16", |b| {
        b.iter(|| {
            let input = MeshInput::gather(&map, deep).unwrap();
            black_box(build_block_mesh(&input, &content).unwrap());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_surface_block);
criterion_main!(benches);
