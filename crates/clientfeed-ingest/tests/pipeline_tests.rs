//! End-to-end ingestion tests
//!
//! Each test drops a file into a temporary inbound directory, ingests it with
//! an in-memory gateway and checks the resulting stats and file location.

mod common;

use std::sync::Arc;

use anyhow::Result;
use clientfeed_ingest::config::PipelineConfig;
use clientfeed_ingest::gateway::{MemoryGateway, PersistenceGateway};
use clientfeed_ingest::lifecycle::JobState;
use clientfeed_ingest::output::{processed_log_path, rejected_log_path};
use clientfeed_ingest::record::{MSG_AGE_TOO_HIGH, MSG_AGE_TOO_LOW, MSG_INVALID_FORMAT};
use clientfeed_ingest::ValidationError;
use common::{init_tracing, memory_gateway, pipeline, FailingGateway, TestDirs};
use proptest::prelude::*;
use tracing::info;

const EXAMPLE: &str = "000001|Ann|Lee|ann@x.com|30\n000002|Bo||bo@x.com|40\n000001|Ann|Lee|ann@x.com|30";

#[tokio::test]
async fn test_end_to_end_example() -> Result<()> {
    init_tracing();
    let env = TestDirs::new().await;
    let gateway = memory_gateway();
    let path = env.write_inbound("CLIENTS_IN_1.dat", EXAMPLE);

    let report = env.ingestor(gateway.clone(), PipelineConfig::default()).ingest(&path).await?;
    info!(stats = ?report.stats, "Example ingested");

    let stats = &report.stats;
    assert_eq!(stats.total_lines, 3);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.duplicates, 1);
    assert!(stats.is_balanced());
    assert_eq!(stats.error_details.len(), 1);
    assert_eq!(stats.error_details[0].errors, vec![MSG_INVALID_FORMAT.to_string()]);

    assert!(report.succeeded());
    assert_eq!(report.failure, None);
    assert_eq!(env.files_in(JobState::Processed), vec!["CLIENTS_IN_1.dat"]);
    assert!(env.files_in(JobState::Discovered).is_empty());
    assert!(env.files_in(JobState::Processing).is_empty());

    let stored = gateway.get("000001").await.expect("record stored");
    assert_eq!(stored.first_name(), "Ann");
    assert_eq!(gateway.len().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_whitespace_only_field_is_a_format_error() -> Result<()> {
    let env = TestDirs::new().await;
    let path = env.write_inbound("CLIENTS_IN_ws.dat", "7|Bo| |bo@x.com|40\n");

    let report = env.ingestor(memory_gateway(), PipelineConfig::default()).ingest(&path).await?;

    // Fields are trimmed before the shape check
    assert_eq!(report.stats.errors, 1);
    assert_eq!(report.stats.error_details[0].content, "7|Bo||bo@x.com|40");
    assert_eq!(report.stats.error_details[0].errors, vec![MSG_INVALID_FORMAT.to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_ages_are_errors() -> Result<()> {
    let env = TestDirs::new().await;
    let gateway = memory_gateway();
    let path = env.write_inbound(
        "CLIENTS_IN_ages.dat",
        "1|Ann|Lee|ann@x.com|0\n2|Bo|Ray|bo@x.com|121\n3|Cy|Fox|cy@x.com|120\n4|Di|Poe|di@x.com|1\n",
    );

    let report = env.ingestor(gateway.clone(), PipelineConfig::default()).ingest(&path).await?;

    let stats = &report.stats;
    assert_eq!((stats.processed, stats.errors, stats.duplicates), (2, 2, 0));
    assert_eq!(stats.error_details[0].errors, vec![MSG_AGE_TOO_LOW.to_string()]);
    assert_eq!(stats.error_details[1].errors, vec![MSG_AGE_TOO_HIGH.to_string()]);
    assert!(gateway.get("1").await.is_none());
    assert!(gateway.get("2").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_existing_ids_skip_validation() -> Result<()> {
    let env = TestDirs::new().await;
    let seed = TestDirs::new().await;
    let gateway = memory_gateway();

    let first = seed.write_inbound("CLIENTS_IN_seed.dat", "1|A|B|a@b.co|20\n2|C|D|c@d.co|30\n3|E|F|e@f.co|40\n");
    seed.ingestor(gateway.clone(), PipelineConfig::default()).ingest(&first).await?;

    // Same ids, every line otherwise invalid
    let path = env.write_inbound("CLIENTS_IN_dup.dat", "1|A|B|bad|0\n2||D|c@d.co|x\n3|E|F|e@f.co|999\n");
    let report = env.ingestor(gateway.clone(), PipelineConfig::default()).ingest(&path).await?;

    let stats = &report.stats;
    assert_eq!(stats.duplicates, 3);
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.errors, 0);
    assert!(stats.error_details.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reingest_is_idempotent() -> Result<()> {
    let env = TestDirs::new().await;
    let gateway = memory_gateway();
    let content = "10|Ann|Lee|ann@x.com|30\n11|Bo|Ray|bo@x.com|40\n12|Cy|Fox|cy@x.com|50\n";

    let path = env.write_inbound("CLIENTS_IN_a.dat", content);
    let first = env.ingestor(gateway.clone(), pipeline(2)).ingest(&path).await?;
    assert_eq!(first.stats.processed, 3);

    let path = env.write_inbound("CLIENTS_IN_b.dat", content);
    let second = env.ingestor(gateway.clone(), pipeline(2)).ingest(&path).await?;

    assert_eq!(second.stats.duplicates, second.stats.total_lines);
    assert_eq!(second.stats.processed, 0);
    assert_eq!(second.stats.errors, 0);
    assert_eq!(gateway.len().await, 3);
    Ok(())
}

#[tokio::test]
async fn test_blank_lines_and_partial_final_chunk() -> Result<()> {
    let env = TestDirs::new().await;
    let gateway = memory_gateway();
    let mut content = String::new();
    for i in 1..=7 {
        content.push_str(&format!("{i}|First{i}|Last{i}|user{i}@x.com|{}\r\n", 20 + i));
        content.push_str("   \n\n");
    }
    let path = env.write_inbound("CLIENTS_IN_blank.dat", content);

    let report = env.ingestor(gateway.clone(), pipeline(3)).ingest(&path).await?;

    assert_eq!(report.stats.total_lines, 7);
    assert_eq!(report.stats.processed, 7);
    assert_eq!(gateway.save_calls(), 3);
    assert_eq!(gateway.exist_calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_error_window_spills_oldest_in_order() -> Result<()> {
    let env = TestDirs::new().await;
    let content: String = (1..=5).map(|i| format!("bad line {i}\n")).collect();
    let path = env.write_inbound("CLIENTS_IN_spill.dat", content);
    let config = PipelineConfig {
        max_errors_in_memory: 2,
        ..pipeline(1)
    };

    let report = env.ingestor(memory_gateway(), config).ingest(&path).await?;

    let stats = &report.stats;
    assert_eq!(stats.errors, 5);
    assert_eq!(stats.omitted_errors, 3);
    let retained: Vec<&str> = stats.error_details.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(retained, vec!["bad line 4", "bad line 5"]);

    let spill = std::fs::read_to_string(env.dirs.spill_log("CLIENTS_IN_spill.dat"))?;
    let spilled: Vec<ValidationError> = spill
        .lines()
        .map(serde_json::from_str)
        .collect::<std::result::Result<_, _>>()?;
    let spilled: Vec<&str> = spilled.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(spilled, vec!["bad line 1", "bad line 2", "bad line 3"]);
    Ok(())
}

#[tokio::test]
async fn test_no_spill_log_without_overflow() -> Result<()> {
    let env = TestDirs::new().await;
    let path = env.write_inbound("CLIENTS_IN_few.dat", "bad\n1|A|B|a@b.co|20\n");

    let report = env.ingestor(memory_gateway(), PipelineConfig::default()).ingest(&path).await?;

    assert_eq!(report.stats.omitted_errors, 0);
    assert!(!env.dirs.spill_log("CLIENTS_IN_few.dat").exists());
    Ok(())
}

#[tokio::test]
async fn test_failed_upserts_become_errors_and_file_completes() -> Result<()> {
    let env = TestDirs::new().await;
    let path = env.write_inbound(
        "CLIENTS_IN_db.dat",
        "1|A|B|a@b.co|20\n2|C|D|c@d.co|30\n3|E|F|bad|40\n4|G|H|g@h.co|50\n",
    );

    let report = env.ingestor(Arc::new(FailingGateway), pipeline(2)).ingest(&path).await?;

    let stats = &report.stats;
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.errors, 4);
    assert!(stats.is_balanced());
    let save_failures = stats
        .error_details
        .iter()
        .filter(|e| e.errors[0].starts_with("Error saving to DB"))
        .count();
    assert_eq!(save_failures, 3);
    assert_eq!(report.state, JobState::Processed);
    Ok(())
}

#[tokio::test]
async fn test_repeated_line_in_failed_batch_matches_line_by_line_outcome() -> Result<()> {
    let content = "1|A|B|a@b.co|20\n1|A|B|a@b.co|20\n";
    let whole = TestDirs::new().await;
    let single = TestDirs::new().await;

    let path = whole.write_inbound("CLIENTS_IN_rep.dat", content);
    let batched = whole.ingestor(Arc::new(FailingGateway), pipeline(100)).ingest(&path).await?;
    let path = single.write_inbound("CLIENTS_IN_rep.dat", content);
    let one_by_one = single.ingestor(Arc::new(FailingGateway), pipeline(1)).ingest(&path).await?;

    let stats = &batched.stats;
    assert_eq!((stats.processed, stats.errors, stats.duplicates), (0, 2, 0));
    assert!(stats.same_outcome(&one_by_one.stats));

    let rejected = std::fs::read_to_string(rejected_log_path(&whole.dirs.output_dir(), "CLIENTS_IN_rep.dat"))?;
    assert_eq!(rejected, content);
    assert!(!processed_log_path(&whole.dirs.output_dir(), "CLIENTS_IN_rep.dat").exists());
    Ok(())
}

#[tokio::test]
async fn test_outcome_logs_keep_stream_order_across_chunks() -> Result<()> {
    let env = TestDirs::new().await;
    let name = "CLIENTS_IN_out.dat";
    let path = env.write_inbound(
        name,
        "1|Ann|Lee|ann@x.com|30\n\
         bad one\n\
         2|Bo|Ray|bo@x.com|40\n\
         1|Ann|Lee|ann@x.com|30\n\
         3| Cy ||cy@x.com|50\n\
         4|Di|Poe|di@x.com|60\n",
    );

    let report = env.ingestor(memory_gateway(), pipeline(2)).ingest(&path).await?;

    let stats = &report.stats;
    assert_eq!((stats.processed, stats.errors, stats.duplicates), (3, 2, 1));

    let processed = std::fs::read_to_string(processed_log_path(&env.dirs.output_dir(), name))?;
    assert_eq!(
        processed,
        "1|Ann|Lee|ann@x.com|30\n2|Bo|Ray|bo@x.com|40\n4|Di|Poe|di@x.com|60\n"
    );
    let rejected = std::fs::read_to_string(rejected_log_path(&env.dirs.output_dir(), name))?;
    assert_eq!(rejected, "bad one\n3|Cy||cy@x.com|50\n");

    // Logs live beside the lifecycle directories, not in them
    assert_eq!(env.files_in(JobState::Processed), vec![name]);
    assert!(env.files_in(JobState::Errored).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_file_moves_to_error() -> Result<()> {
    let env = TestDirs::new().await;
    let gateway = memory_gateway();
    let mut content = b"1|Ann|Lee|ann@x.com|30\n".to_vec();
    content.extend_from_slice(&[0xff, 0xfe, b'|', b'x', b'\n']);
    content.extend_from_slice(b"2|Bo|Ray|bo@x.com|40\n");
    let path = env.write_inbound("CLIENTS_IN_bin.dat", content);

    let report = env.ingestor(gateway.clone(), PipelineConfig::default()).ingest(&path).await?;

    assert_eq!(report.state, JobState::Errored);
    assert!(report.failure.is_some());
    assert_eq!(env.files_in(JobState::Errored), vec!["CLIENTS_IN_bin.dat"]);
    assert!(env.files_in(JobState::Processing).is_empty());
    // Lines read before the failure are still accounted for
    assert_eq!(report.stats.processed, 1);
    assert!(gateway.get("1").await.is_some());
    assert!(gateway.get("2").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_oversized_line_is_rejected_and_reading_continues() -> Result<()> {
    let env = TestDirs::new().await;
    let long = format!("9|{}|Lee|ann@x.com|30", "A".repeat(200));
    let content = format!("1|Ann|Lee|ann@x.com|30\n{long}\n2|Bo|Ray|bo@x.com|40\n");
    let path = env.write_inbound("CLIENTS_IN_long.dat", content);
    let config = PipelineConfig {
        max_line_length: 64,
        ..PipelineConfig::default()
    };

    let report = env.ingestor(memory_gateway(), config).ingest(&path).await?;

    let stats = &report.stats;
    assert_eq!(stats.total_lines, 3);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.error_details[0].file_line, 2);
    assert!(report.succeeded());
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_not_claimed() {
    let env = TestDirs::new().await;
    let ingestor = env.ingestor(memory_gateway(), PipelineConfig::default());

    let result = ingestor.ingest(&env.dirs.inbound().join("CLIENTS_IN_gone.dat")).await;

    assert!(result.is_err());
    assert!(env.files_in(JobState::Processing).is_empty());
}

fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        8 => (0u8..12, -2i32..125, any::<bool>(), any::<bool>()).prop_map(|(id, age, good_email, named)| {
            let email = if good_email { "user@example.com" } else { "user.example.com" };
            let first = if named { "Ann" } else { "" };
            format!("{id:06}|{first}|Lee|{email}|{age}")
        }),
        1 => "[a-z|]{0,12}",
        1 => Just(String::from("   ")),
    ]
}

fn ingest_with_chunk_size(
    content: &str,
    chunk_size: usize,
    gateway: Arc<dyn PersistenceGateway>,
) -> clientfeed_ingest::ProcessingStats {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    runtime.block_on(async {
        let env = TestDirs::new().await;
        let path = env.write_inbound("CLIENTS_IN_prop.dat", content);
        env.ingestor(gateway, pipeline(chunk_size))
            .ingest(&path)
            .await
            .expect("ingest failed")
            .stats
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_chunk_size_does_not_change_outcome(lines in prop::collection::vec(line_strategy(), 0..60)) {
        let content = lines.join("\n");

        let large = ingest_with_chunk_size(&content, 100, Arc::new(MemoryGateway::new()));
        let single = ingest_with_chunk_size(&content, 1, Arc::new(MemoryGateway::new()));
        let odd = ingest_with_chunk_size(&content, 7, Arc::new(MemoryGateway::new()));

        prop_assert!(large.is_balanced());
        prop_assert!(large.same_outcome(&single), "100 vs 1: {:?} / {:?}", large, single);
        prop_assert!(large.same_outcome(&odd), "100 vs 7: {:?} / {:?}", large, odd);
    }

    #[test]
    fn prop_chunk_size_does_not_change_outcome_when_saves_fail(
        lines in prop::collection::vec(line_strategy(), 0..60),
    ) {
        let content = lines.join("\n");

        let large = ingest_with_chunk_size(&content, 100, Arc::new(FailingGateway));
        let single = ingest_with_chunk_size(&content, 1, Arc::new(FailingGateway));
        let odd = ingest_with_chunk_size(&content, 7, Arc::new(FailingGateway));

        prop_assert_eq!(large.processed, 0);
        prop_assert!(large.is_balanced());
        prop_assert!(large.same_outcome(&single), "100 vs 1: {:?} / {:?}", large, single);
        prop_assert!(large.same_outcome(&odd), "100 vs 7: {:?} / {:?}", large, odd);
    }
}
