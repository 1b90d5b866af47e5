mod common;
use common::files_in;

use std::collections::HashMap;

use bigsort::{ByteValues, MapReduce, Values};
use rand::seq::SliceRandom;
use tempfile::TempDir;

fn engine(dir: &TempDir, mem_limit: usize) -> MapReduce {
    MapReduce::new().with_mem_limit(mem_limit).in_dir(dir.path())
}

fn count_words(key: &str, values: Values) -> usize {
    let _ = key;
    values.count()
}

#[test]
fn test_word_count_in_memory_and_on_disk() {
    let sentences = vec![
        "the quick brown fox",
        "the lazy dog",
        "the quick dog",
    ];

    let dir = TempDir::new().unwrap();
    for mem_limit in [0usize, 1 << 20] {
        let output = engine(&dir, mem_limit)
            .run(
                |sentence: &str| {
                    sentence
                        .split_whitespace()
                        .map(|w| (w.to_string(), "1".to_string()))
                        .collect::<Vec<_>>()
                },
                count_words,
                sentences.clone(),
            )
            .unwrap();
        let counts: Vec<(String, usize)> = output.map(|r| r.unwrap()).collect();

        assert_eq!(
            counts,
            vec![
                ("brown".to_string(), 1),
                ("dog".to_string(), 2),
                ("fox".to_string(), 1),
                ("lazy".to_string(), 1),
                ("quick".to_string(), 2),
                ("the".to_string(), 3),
            ]
        );
    }
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_identity_reducer_preserves_pair_counts() {
    let dir = TempDir::new().unwrap();
    for mem_limit in [0usize, 1 << 20] {
        let output = engine(&dir, mem_limit)
            .run(
                |i: u32| vec![(format!("{:02}", i % 50), i.to_string())],
                |_key, values: Values| values.collect::<Vec<String>>(),
                0..500u32,
            )
            .unwrap();

        let groups: Vec<(String, Vec<String>)> = output.map(|r| r.unwrap()).collect();
        assert_eq!(groups.len(), 50);
        let mut total = 0;
        for (_, values) in &groups {
            assert_eq!(values.len(), 10);
            total += values.len();
        }
        assert_eq!(total, 500);
    }
}

#[test]
fn test_forced_disk_mode_matches_in_memory_exactly() {
    // Values exercise what the framing must tolerate: embedded newlines and
    // `|` are legal in values, only NUL is not.
    let items: Vec<(String, String)> = vec![
        ("b".into(), "line one\nline two".into()),
        ("a".into(), "with|delimiter".into()),
        ("b".into(), "second".into()),
        ("".into(), "empty key".into()),
        ("a".into(), "third".into()),
    ];

    let mut outputs = Vec::new();
    let dir = TempDir::new().unwrap();
    for mem_limit in [0usize, 1 << 20] {
        let output = engine(&dir, mem_limit)
            .run(
                |pair: (String, String)| vec![pair],
                |_key, values: Values| values.collect::<Vec<String>>(),
                items.clone(),
            )
            .unwrap();
        outputs.push(output.map(|r| r.unwrap()).collect::<Vec<_>>());
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(
        outputs[0],
        vec![
            ("".to_string(), vec!["empty key".to_string()]),
            (
                "a".to_string(),
                vec!["with|delimiter".to_string(), "third".to_string()]
            ),
            (
                "b".to_string(),
                vec!["line one\nline two".to_string(), "second".to_string()]
            ),
        ]
    );
}

#[test]
fn test_bucketed_range_scenario() {
    // Every v in 0..10000 emits itself and its thousand-bucket; every
    // multiple of 1000 therefore collects its own emission plus one from
    // each of the 1000 values in its bucket.
    let mut data: Vec<u32> = (0..10_000).collect();
    data.shuffle(&mut rand::rng());

    let dir = TempDir::new().unwrap();
    // Small enough to force the disk transition partway through the map.
    let output = engine(&dir, 1 << 12)
        .run(
            |v: u32| {
                vec![
                    (v.to_string(), v.to_string()),
                    ((v - v % 1000).to_string(), v.to_string()),
                ]
            },
            |_key, values: Values| {
                values
                    .map(|v| v.parse::<u32>().unwrap())
                    .collect::<Vec<u32>>()
            },
            data,
        )
        .unwrap();

    let groups: HashMap<String, Vec<u32>> = output
        .map(|r| {
            let (key, values) = r.unwrap();
            (key, values)
        })
        .collect();

    assert_eq!(groups.len(), 10_000);
    for (key, values) in &groups {
        let key: u32 = key.parse().unwrap();
        if key % 1000 == 0 {
            assert_eq!(values.len(), 1001, "bucket key {}", key);
        } else {
            assert_eq!(values.len(), 1, "plain key {}", key);
        }
    }
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_serialized_values_round_trip_through_disk() {
    // Raw bytes with NULs and newlines would violate the textual framing;
    // serialized mode must carry them through anyway.
    let payloads: Vec<Vec<u8>> = vec![
        b"plain".to_vec(),
        b"nul\0inside".to_vec(),
        b"newline\nand|pipe".to_vec(),
        vec![0xff, 0x00, 0x7f],
    ];

    let dir = TempDir::new().unwrap();
    for mem_limit in [0usize, 1 << 20] {
        let output = engine(&dir, mem_limit)
            .run_serialized(
                |payload: Vec<u8>| vec![("k".to_string(), payload)],
                |_key, values: ByteValues| values.collect::<Vec<Vec<u8>>>(),
                payloads.clone(),
            )
            .unwrap();

        let groups: Vec<(String, Vec<Vec<u8>>)> = output.map(|r| r.unwrap()).collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "k");
        assert_eq!(groups[0].1, payloads);
    }
    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_empty_input_and_silent_mapper() {
    let dir = TempDir::new().unwrap();

    let output = engine(&dir, 0)
        .run(
            |i: u32| vec![(i.to_string(), i.to_string())],
            |_key, values: Values| values.count(),
            std::iter::empty::<u32>(),
        )
        .unwrap();
    assert_eq!(output.count(), 0);

    // A mapper may emit nothing for every item.
    let output = engine(&dir, 0)
        .run(
            |_i: u32| Vec::<(String, String)>::new(),
            |_key, values: Values| values.count(),
            0..100u32,
        )
        .unwrap();
    assert_eq!(output.count(), 0);

    assert_eq!(files_in(dir.path()), 0);
}

#[test]
fn test_close_releases_spill_files_on_early_abandonment() {
    let dir = TempDir::new().unwrap();
    let mut output = engine(&dir, 0)
        .run(
            |i: u32| vec![(format!("{:03}", i), i.to_string())],
            |_key, values: Values| values.count(),
            0..100u32,
        )
        .unwrap();

    assert_eq!(output.next().unwrap().unwrap(), ("000".to_string(), 1));
    // Spill and sorted files are still alive mid-iteration.
    assert!(files_in(dir.path()) > 0);

    output.close();
    assert_eq!(files_in(dir.path()), 0);
    assert!(output.next().is_none());
}

#[test]
fn test_no_files_remain_after_reduce_completes() {
    let dir = TempDir::new().unwrap();
    let mut output = engine(&dir, 0)
        .run(
            |i: u32| vec![(format!("{:03}", i % 10), i.to_string())],
            |_key, values: Values| values.count(),
            0..100u32,
        )
        .unwrap();

    let results: Vec<(String, usize)> = output.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|(_, count)| *count == 10));
    // Exhaustion alone must have cleaned up; the output is still alive.
    assert_eq!(files_in(dir.path()), 0);
    drop(output);
}
