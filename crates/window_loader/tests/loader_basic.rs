mod common;

use anyhow::Result;
use common::{grouped_config, origin, origins, TrackedSource};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use window_loader::{
    align_windows, Batch, LoaderConfig, PartitionScheme, Query, WindowTensor, WindowedLoader,
};

fn collect(loader: &mut WindowedLoader) -> Result<Vec<Batch<WindowTensor>>> {
    let batches = loader.iter()?.collect::<window_loader::Result<Vec<_>>>()?;
    Ok(batches)
}

#[test]
fn test_single_partition_scenario() -> Result<()> {
    // N=10, W=3, S=1, batch_size=2, drop_incomplete, offset 0
    let source = Arc::new(TrackedSource::new(&[10]));
    let config = LoaderConfig::builder(Query::new("sensors"))
        .input_columns(["row"])
        .target_columns(["value"])
        .window_size(3)
        .window_stride(1)
        .offset(0)
        .batch_size(2)
        .drop_incomplete(true)
        .poll_interval(Duration::from_millis(10))
        .build();
    let mut loader = WindowedLoader::new(source, config)?;

    let batches = collect(&mut loader)?;
    assert_eq!(batches.len(), 4);
    let starts: Vec<Vec<usize>> = batches
        .iter()
        .map(|b| b.origins.iter().map(|o| o.start).collect())
        .collect();
    assert_eq!(starts, vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7]]);

    for batch in &batches {
        assert_eq!(batch.input.shape(), [2, 3, 1]);
        assert_eq!(batch.target.shape(), [2, 3, 1]);
        for (i, o) in batch.origins.iter().enumerate() {
            let s = o.start as f64;
            assert_eq!(batch.input.window(i), &[s, s + 1.0, s + 2.0]);
            assert_eq!(batch.target.window(i), &[s, s + 1.0, s + 2.0]);
        }
    }
    Ok(())
}

#[test]
fn test_default_offset_targets_the_following_rows() -> Result<()> {
    // Offset defaults to the input window size, so the target window is the
    // three rows right after the input window and only 5 pairs fit in 10 rows.
    let source = Arc::new(TrackedSource::new(&[10]));
    let config = LoaderConfig::builder(Query::new("sensors"))
        .input_columns(["row"])
        .target_columns(["value"])
        .window_size(3)
        .batch_size(2)
        .poll_interval(Duration::from_millis(10))
        .build();
    let mut loader = WindowedLoader::new(source, config)?;
    assert_eq!(loader.resolved().offset, 3);

    let batches = collect(&mut loader)?;
    let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);

    for batch in &batches {
        for (i, o) in batch.origins.iter().enumerate() {
            let t = (o.start + 3) as f64;
            assert_eq!(batch.target.window(i), &[t, t + 1.0, t + 2.0]);
        }
    }
    Ok(())
}

#[test]
fn test_partitions_are_traversed_one_at_a_time() -> Result<()> {
    // Partitions of 5 and 7 rows, W=2, S=2, pool_size 1, no shuffle
    let source = Arc::new(TrackedSource::new(&[5, 7]));
    let config = grouped_config(&[5, 7])
        .window_size(2)
        .window_stride(2)
        .offset(0)
        .pool_size(1)
        .build();
    let mut loader = WindowedLoader::new(source, config)?;
    assert_eq!(loader.partitions().len(), 2);

    let batches = collect(&mut loader)?;
    assert_eq!(
        origins(&batches),
        vec![
            origin(0, 0),
            origin(0, 2),
            origin(1, 0),
            origin(1, 2),
            origin(1, 4)
        ]
    );
    Ok(())
}

#[test]
fn test_drop_incomplete_controls_last_batch() -> Result<()> {
    let sizes = [6, 9, 4];
    // 5 + 8 + 3 = 16 windows of 2 rows with offset 0
    for (drop, expected) in [(true, vec![5, 5, 5]), (false, vec![5, 5, 5, 1])] {
        let source = Arc::new(TrackedSource::new(&sizes));
        let config = grouped_config(&sizes)
            .window_size(2)
            .offset(0)
            .batch_size(5)
            .drop_incomplete(drop)
            .build();
        let mut loader = WindowedLoader::new(source, config)?;
        let lens: Vec<usize> = collect(&mut loader)?.iter().map(|b| b.len()).collect();
        assert_eq!(lens, expected, "drop_incomplete = {}", drop);
    }
    Ok(())
}

#[test]
fn test_every_sampled_window_is_delivered_once() -> Result<()> {
    let sizes = [12, 3, 0, 17, 8, 1, 25];
    let source = Arc::new(TrackedSource::new(&sizes));
    let config = grouped_config(&sizes)
        .window_size((4, 2))
        .window_stride((2, 1))
        .batch_size(3)
        .pool_size(3)
        .build();
    let mut loader = WindowedLoader::new(source, config)?;
    let resolved = loader.resolved().clone();

    let mut expected = Vec::new();
    for (p, &n) in sizes.iter().enumerate() {
        let aligned = align_windows(
            n,
            resolved.input_window,
            resolved.target_window,
            resolved.offset,
            false,
            0,
        )?;
        expected.extend(aligned.starts.into_iter().map(|s| origin(p, s)));
    }

    let mut iter = loader.iter()?;
    let batches = iter.by_ref().collect::<window_loader::Result<Vec<_>>>()?;
    let delivered = origins(&batches);
    assert_eq!(delivered, expected);

    let stats = iter.stats();
    assert_eq!(stats.windows, expected.len());
    assert_eq!(stats.batches, batches.len());
    assert_eq!(stats.partitions_skipped, 3);
    assert_eq!(stats.partitions_completed, 4);
    iter.release()?;
    Ok(())
}

#[test]
fn test_shuffled_epoch_covers_same_windows() -> Result<()> {
    let sizes = [12, 3, 17, 8, 25];
    let source = Arc::new(TrackedSource::new(&sizes));
    let build = |shuffle: bool| {
        grouped_config(&sizes)
            .window_size(3)
            .batch_size(4)
            .pool_size(2)
            .shuffle(shuffle)
            .seed(17)
            .build()
    };

    let mut plain = WindowedLoader::new(source.clone(), build(false))?;
    let mut shuffled = WindowedLoader::new(source, build(true))?;
    let plain_origins = origins(&collect(&mut plain)?);
    let shuffled_origins = origins(&collect(&mut shuffled)?);

    let as_set = |o: &[window_loader::WindowOrigin]| o.iter().copied().collect::<BTreeSet<_>>();
    assert_eq!(shuffled_origins.len(), plain_origins.len());
    assert_eq!(as_set(&shuffled_origins[..]), as_set(&plain_origins[..]));
    assert_ne!(shuffled_origins, plain_origins);
    Ok(())
}

#[test]
fn test_target_window_follows_input_by_offset() -> Result<()> {
    let sizes = [20, 15];
    let source = Arc::new(TrackedSource::new(&sizes));
    let config = grouped_config(&sizes)
        .window_size((5, 2))
        .offset(7)
        .batch_size(4)
        .shuffle(true)
        .seed(3)
        .build();
    let mut loader = WindowedLoader::new(source, config)?;

    for batch in collect(&mut loader)? {
        for (i, o) in batch.origins.iter().enumerate() {
            let s = o.start as f64;
            let t = (o.partition * 1000 + o.start + 7) as f64;
            assert_eq!(batch.input.window(i), &[s, s + 1.0, s + 2.0, s + 3.0, s + 4.0]);
            assert_eq!(batch.target.window(i), &[t, t + 1.0]);
        }
    }
    Ok(())
}

#[test]
fn test_repartitioned_windows_stay_inside_slices() -> Result<()> {
    let source = Arc::new(TrackedSource::new(&[10]));
    let config = LoaderConfig::builder(Query::new("sensors"))
        .input_columns(["row"])
        .target_columns(["value"])
        .window_size(2)
        .offset(0)
        .repartition_by("row", PartitionScheme::Ranges(vec![(0.0, 5.0), (5.0, 10.0)]))
        .poll_interval(Duration::from_millis(10))
        .build();
    let mut loader = WindowedLoader::new(source, config)?;
    assert_eq!(loader.partitions().len(), 1);
    assert_eq!(loader.partitions()[0].len(), 2);

    let batches = collect(&mut loader)?;
    // 4 windows per 5-row slice; no window spans rows 4 and 5
    assert_eq!(batches.len(), 8);
    for batch in &batches {
        let rows = batch.input.window(0);
        assert!(rows[0] + 1.0 == rows[1]);
        assert!(!(rows[0] == 4.0 && rows[1] == 5.0));
    }
    assert_eq!(batches[4].input.window(0), &[5.0, 6.0]);
    Ok(())
}

#[test]
fn test_default_input_columns_and_exclusions() -> Result<()> {
    let source = Arc::new(TrackedSource::new(&[6]));
    let config = LoaderConfig::builder(Query::new("sensors"))
        .target_columns(["value"])
        .window_size(2)
        .batch_size(2)
        .poll_interval(Duration::from_millis(10))
        .build();
    let mut loader = WindowedLoader::new(source.clone(), config)?;
    assert_eq!(loader.resolved().input_columns, vec!["partition", "row"]);
    let first = loader.iter()?.next().expect("one batch")?;
    assert_eq!(first.input.shape(), [2, 2, 2]);
    assert_eq!(first.input.columns(), &["partition".to_string(), "row".to_string()]);

    let config = LoaderConfig::builder(Query::new("sensors"))
        .target_columns(["value"])
        .excluded_columns(["partition"])
        .poll_interval(Duration::from_millis(10))
        .build();
    let loader = WindowedLoader::new(source, config)?;
    assert_eq!(loader.resolved().input_columns, vec!["row"]);
    Ok(())
}

#[test]
fn test_loader_restarts_for_every_epoch() -> Result<()> {
    let sizes = [7, 9];
    let source = Arc::new(TrackedSource::new(&sizes));
    let config = grouped_config(&sizes).window_size(3).batch_size(2).build();
    let mut loader = WindowedLoader::new(source.clone(), config)?;

    let first = origins(&collect(&mut loader)?);
    let second = origins(&collect(&mut loader)?);
    assert_eq!(first, second);
    assert_eq!(loader.epochs_started(), 2);
    // Every stream of both epochs was released: 2 partitions x 2 roles x 2 epochs
    assert_eq!(source.releases(), 8);
    Ok(())
}

#[test]
fn test_empty_dataset_yields_no_batches() -> Result<()> {
    let sizes = [1, 2];
    let source = Arc::new(TrackedSource::new(&sizes));
    let config = grouped_config(&sizes).window_size(3).build();
    let mut loader = WindowedLoader::new(source.clone(), config)?;

    let mut iter = loader.iter()?;
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
    assert_eq!(iter.stats().partitions_skipped, 2);
    iter.release()?;
    assert_eq!(source.fetches(), 0);
    Ok(())
}
