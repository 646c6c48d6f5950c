//! 仓库扫描性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 嵌套归档仓库完整扫描基准
//! - 前缀过滤条目流基准
//! - 归档 URI 构造与解析基准

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use chips_habitat::archive::{ArchiveUri, LazySequence, StreamEntries};
use chips_habitat::{NestedArchiveRepository, Repository, RepositoryContext};
use std::io::{Cursor, Write};
use tempfile::TempDir;
use url::Url;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

// ============================================================================
// 测试辅助函数
// ============================================================================

fn zip_bytes(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// 构造一个模块归档：清单 + 若干描述符与服务文件
fn module_jar(index: usize) -> Vec<u8> {
    let manifest = format!(
        "Manifest-Version: 1.0\r\nBundle-Name: bench.module{0}\r\nBundle-Version: 1.{0}.0\r\n\r\n",
        index
    );
    let descriptors = (0..8)
        .map(|i| format!("[bench.Impl{i}]\ncontract={{bench.Api{i}}}\nname=impl{i}\n\n"))
        .collect::<String>();

    zip_bytes(&[
        ("META-INF/MANIFEST.MF".to_string(), manifest.into_bytes()),
        ("META-INF/hk2-locator/default".to_string(), descriptors.into_bytes()),
        (
            "META-INF/services/bench.Api".to_string(),
            format!("bench.Impl{index}\n").into_bytes(),
        ),
        ("bench/Impl.class".to_string(), vec![0u8; 512]),
    ])
}

/// 在临时目录写出含 `modules` 个模块与同样多普通库的容器
fn write_container(dir: &TempDir, modules: usize) -> String {
    let mut entries = Vec::with_capacity(modules * 2);
    for i in 0..modules {
        entries.push((format!("modules/module{i}.jar"), module_jar(i)));
        entries.push((
            format!("modules/lib{i}.jar"),
            zip_bytes(&[("lib/Util.class".to_string(), vec![1u8; 256])]),
        ));
    }

    let path = dir.path().join(format!("container-{modules}.zip"));
    std::fs::write(&path, zip_bytes(&entries)).unwrap();
    format!("archive:{}!/modules/", Url::from_file_path(&path).unwrap())
}

// ============================================================================
// 基准测试
// ============================================================================

/// 仓库扫描基准
fn bench_repository_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut group = c.benchmark_group("repository_scan");

    for modules in [4usize, 16, 64] {
        let uri = write_container(&dir, modules);
        group.throughput(Throughput::Elements((modules * 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(modules), &uri, |b, uri| {
            b.iter(|| {
                let repository =
                    NestedArchiveRepository::new(black_box(uri), RepositoryContext::default())
                        .unwrap();
                black_box(repository.find_all().len())
            })
        });
    }

    group.finish();
}

/// 条目流基准
fn bench_stream_entries(c: &mut Criterion) {
    let jar = module_jar(0);

    c.bench_function("stream_entries_prefix", |b| {
        b.iter(|| {
            let mut entries = StreamEntries::new(Cursor::new(black_box(&jar)), "META-INF/hk2-locator/");
            let mut count = 0;
            while entries.has_more().unwrap() {
                black_box(entries.take_next().unwrap());
                count += 1;
            }
            count
        })
    });
}

/// URI 基准
fn bench_archive_uri(c: &mut Criterion) {
    let container = "archive:file:/opt/app.zip!/modules/core.jar";

    c.bench_function("archive_uri_round_trip", |b| {
        b.iter(|| {
            let uri = ArchiveUri::build(black_box(container), black_box("lib/nested.jar")).unwrap();
            black_box(ArchiveUri::parse(&uri).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_repository_scan,
    bench_stream_entries,
    bench_archive_uri
);
criterion_main!(benches);
