use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use filelist_core::cache::EntryCache;
use filelist_core::listing::filter::{FilterOptions, file_included, filter_entries};
use filelist_core::listing::sort::sort_entries;
use filelist_core::listing::{FilterConfig, SortKey};
use filelist_core::model::{EntryStat, InternEntry, TypeFlags};

const SIZES: [usize; 3] = [1_000, 10_000, 100_000];

const EXTENSIONS: [(&str, TypeFlags); 5] = [
    ("txt", TypeFlags::TEXT),
    ("png", TypeFlags::IMAGE),
    ("blend", TypeFlags::BLENDER),
    ("py", TypeFlags::PYSCRIPT),
    ("wav", TypeFlags::SOUND),
];

fn synthetic_entries(count: usize) -> Vec<Arc<InternEntry>> {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    (0..count)
        .map(|i| {
            let (ext, typeflag) = EXTENSIONS[i % EXTENSIONS.len()];
            let mut entry = if i % 17 == 0 {
                InternEntry::new(format!("dir_{i}"), TypeFlags::DIR)
            } else if i % 23 == 0 {
                InternEntry::new(format!(".hidden_{i}.{ext}"), typeflag)
            } else {
                InternEntry::new(format!("file_{}_{i}.{ext}", (i * 7919) % count), typeflag)
            };
            entry.uid = u32::try_from(i + 1).unwrap_or(u32::MAX);
            entry.stat = EntryStat::new(
                ((i * 104_729) % 1_000_000) as u64,
                Some(base + Duration::from_secs(((i * 31) % 86_400) as u64)),
            );
            Arc::new(entry)
        })
        .collect()
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort");
    for &size in &SIZES {
        let entries = synthetic_entries(size);
        group.throughput(Throughput::Elements(size as u64));
        for key in [SortKey::Name, SortKey::Size, SortKey::Extension] {
            group.bench_with_input(
                BenchmarkId::new(format!("{key:?}"), size),
                &entries,
                |b, entries| {
                    b.iter_batched(
                        || entries.clone(),
                        |mut entries| {
                            sort_entries(&mut entries, key, false);
                            black_box(entries)
                        },
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }
    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    let mut plain = FilterConfig::default();
    plain.set_options(&FilterOptions {
        hide_dot: true,
        ..FilterOptions::default()
    });

    let mut search = plain.clone();
    search.set_options(&FilterOptions {
        hide_dot: true,
        do_filter: true,
        filter: TypeFlags::IMAGE | TypeFlags::FOLDER,
        filter_search: "file_1".into(),
        ..FilterOptions::default()
    });

    for &size in &SIZES {
        let entries = synthetic_entries(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("hide_dot", size), &entries, |b, entries| {
            b.iter(|| black_box(filter_entries(entries, &plain, file_included)));
        });
        group.bench_with_input(BenchmarkId::new("type_and_search", size), &entries, |b, entries| {
            b.iter(|| black_box(filter_entries(entries, &search, file_included)));
        });
    }
    group.finish();
}

fn bench_cache_scroll(c: &mut Criterion) {
    let entries = synthetic_entries(10_000);
    let mut group = c.benchmark_group("cache_block");
    group.throughput(Throughput::Elements(100));
    group.bench_function("scroll_by_one", |b| {
        let mut cache = EntryCache::default();
        let mut index = 0;
        b.iter(|| {
            for _ in 0..100 {
                index = (index + 1) % entries.len();
                black_box(cache.cache_block(index, &entries, false, None));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_sort, bench_filter, bench_cache_scroll);
criterion_main!(benches);
