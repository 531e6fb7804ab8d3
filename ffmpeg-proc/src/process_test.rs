use std::time::Duration;

use super::{CodecProcess, Finish};

fn sh(script: &str, extra: &[&str]) -> Vec<String> {
    let mut args = vec!["-c".to_string(), script.to_string()];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

#[tokio::test]
async fn test_write_and_finish_delivers_bytes_in_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.bin");
    let args = sh("cat > \"$0\"", &[out.to_str().unwrap()]);

    let mut process = CodecProcess::spawn("cat", "sh", &args, true)?;
    process.write(b"first ").await?;
    process.write(b"second ").await?;
    process.write(b"third").await?;

    let finish = process.finish(Duration::from_secs(5)).await;
    assert!(finish.success(), "unexpected finish: {:?}", finish);
    assert_eq!(std::fs::read(&out)?, b"first second third");
    Ok(())
}

#[tokio::test]
async fn test_finish_kills_unresponsive_process() -> anyhow::Result<()> {
    let args = sh("exec sleep 30", &[]);
    let process = CodecProcess::spawn("sleeper", "sh", &args, true)?;

    let started = std::time::Instant::now();
    let finish = process.finish(Duration::from_millis(200)).await;

    assert_eq!(finish, Finish::Killed);
    assert!(started.elapsed() < Duration::from_secs(10));
    Ok(())
}

#[tokio::test]
async fn test_write_after_exit_fails() -> anyhow::Result<()> {
    let args = sh("exit 0", &[]);
    let mut process = CodecProcess::spawn("quitter", "sh", &args, true)?;

    for _ in 0..100 {
        if process.has_exited() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(process.has_exited());

    let chunk = vec![0u8; 256 * 1024];
    let mut result = Ok(());
    for _ in 0..8 {
        result = process.write(&chunk).await;
        if result.is_err() {
            break;
        }
    }
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_non_zero_exit_is_reported() -> anyhow::Result<()> {
    let args = sh("exit 3", &[]);
    let process = CodecProcess::spawn("failing", "sh", &args, false)?;

    let status = process.wait().await?;
    assert_eq!(status.code(), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_spawn_missing_program_fails() {
    let result = CodecProcess::spawn("missing", "/nonexistent/codec-binary", &[], true);
    assert!(result.is_err());
}
