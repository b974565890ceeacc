use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use objstash_service::caching::ObjectStore;
use objstash_service::config::Config as ObjstashConfig;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{WorkloadsConfig, prepare_payload, process_payload, registry, warmup};

pub async fn perform_stresstest(
    service_config: ObjstashConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // start the object store
    let registry = registry();
    let store = Arc::new(ObjectStore::new(
        service_config.store.clone(),
        registry.clone(),
    ));
    store.initialize().context("failed to initialize object store")?;
    let sweeper = service_config
        .store
        .sweep_interval
        .map(|interval| store.spawn_sweeper(interval));

    // initialize workloads
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let concurrency = workload.concurrency.max(1);
            let payload = prepare_payload(i, &registry, workload);
            (concurrency, Arc::new(payload))
        })
        .collect();

    // warmup: store every key once, so that reads hit from the start
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|(_, workload)| {
            let store = Arc::clone(&store);
            let workload = Arc::clone(workload);
            tokio::task::spawn_blocking(move || warmup(&store, &workload))
        });

        let stored: usize = futures::future::join_all(futures)
            .await
            .into_iter()
            .map(|result| result.unwrap_or_default())
            .sum();

        println!("Warmup: {stored} entries in {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (concurrency, workload) in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let store = Arc::clone(&store);

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let store = Arc::clone(&store);
                        let task_durations = Arc::clone(&task_durations);
                        let task_start = Instant::now();

                        // store operations are synchronous
                        tokio::task::spawn_blocking(move || {
                            process_payload(&store, &workload);

                            task_durations.lock().unwrap().add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations: DDSketch = {
                let mut task_durations = task_durations.lock().unwrap();
                std::mem::take(&mut task_durations)
            };

            (concurrency, task_durations)
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, task_durations) = task.context("workload panicked")?;

        let ops = task_durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        if ops == 0 {
            continue;
        }
        let quantile = |q| {
            let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    let info = store.info()?;
    println!();
    println!(
        "Store: {} entries, {} hits, {} misses, {} stores, {} materializations, {} evictions",
        info.entries, info.hits, info.misses, info.stores, info.materializations, info.evictions
    );

    store.teardown()?;

    Ok(())
}
