use anyhow::Result;
use filevault::client;
use filevault::codec::{Lookup, Response};
use filevault::config::ServerConfig;
use filevault::server::{Server, ShutdownHandle, ShutdownReport};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(10);

fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1:0".to_string(),
        data_dir: root.join("data"),
        registry_path: root.join("registry.txt"),
        shutdown_grace_ms: 2_000,
        ..ServerConfig::default()
    }
}

async fn start(config: ServerConfig) -> Result<(String, ShutdownHandle, JoinHandle<Result<ShutdownReport>>)> {
    let server = Server::bind(&config).await?;
    let addr = server.local_addr()?.to_string();
    let handle = server.shutdown_handle();
    let task = tokio::spawn(server.run());
    Ok((addr, handle, task))
}

fn utf(s: &str) -> Vec<u8> {
    let mut v = (s.len() as u16).to_be_bytes().to_vec();
    v.extend_from_slice(s.as_bytes());
    v
}

/// The server either closes cleanly or resets (unread bytes left behind); either way nothing comes back.
async fn assert_closed_without_reply(mut stream: TcpStream) -> Result<()> {
    let mut reply = Vec::new();
    match timeout(DEADLINE, stream.read_to_end(&mut reply)).await? {
        Ok(_) => assert!(reply.is_empty(), "unexpected reply {reply:?}"),
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn put_get_delete_scenario() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, _handle, task) = start(test_config(tmp.path())).await?;

    let put = client::put(&addr, "report.txt", b"hello".to_vec()).await?;
    assert_eq!(put, Response::Stored(0));
    assert_eq!(std::fs::read(tmp.path().join("data/report.txt"))?, b"hello");

    let got = client::get(&addr, Lookup::ById, "0").await?;
    assert_eq!(got, Response::Content(b"hello".to_vec()));

    let deleted = client::delete(&addr, Lookup::ById, "0").await?;
    assert_eq!(deleted, Response::Deleted);

    let again = client::get(&addr, Lookup::ById, "0").await?;
    assert_eq!(again, Response::NotFound);

    client::exit(&addr).await?;
    let report = timeout(DEADLINE, task).await???;
    assert_eq!(report.entries, 0);
    Ok(())
}

#[tokio::test]
async fn get_missing_name_on_empty_store() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, handle, task) = start(test_config(tmp.path())).await?;

    let got = client::get(&addr, Lookup::ByName, "missing.txt").await?;
    assert_eq!(got, Response::NotFound);

    let deleted = client::delete(&addr, Lookup::ByName, "missing.txt").await?;
    assert_eq!(deleted, Response::NotFound);

    handle.trigger();
    timeout(DEADLINE, task).await???;
    Ok(())
}

#[tokio::test]
async fn duplicate_put_is_forbidden() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, handle, task) = start(test_config(tmp.path())).await?;

    assert_eq!(client::put(&addr, "a.txt", b"1".to_vec()).await?, Response::Stored(0));
    assert_eq!(client::put(&addr, "a.txt", b"2".to_vec()).await?, Response::Forbidden);
    assert_eq!(client::put(&addr, "../a.txt", b"3".to_vec()).await?, Response::Forbidden);
    assert_eq!(client::put(&addr, "b.txt", b"4".to_vec()).await?, Response::Stored(1));

    handle.trigger();
    let report = timeout(DEADLINE, task).await???;
    assert_eq!(report.entries, 2);
    Ok(())
}

#[tokio::test]
async fn get_answers_for_file_above_upload_cap() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = ServerConfig {
        max_blob_size: 16,
        ..test_config(tmp.path())
    };
    std::fs::create_dir_all(tmp.path().join("data"))?;
    std::fs::write(tmp.path().join("data/big.bin"), [7u8; 32])?;
    let (addr, handle, task) = start(config).await?;

    // The cap only limits what clients may upload
    assert_eq!(
        client::get(&addr, Lookup::ByName, "big.bin").await?,
        Response::Content(vec![7u8; 32])
    );
    assert_eq!(client::put(&addr, "up.bin", vec![1u8; 32]).await.ok(), None);
    assert_eq!(client::put(&addr, "up.bin", vec![1u8; 16]).await?, Response::Stored(0));

    handle.trigger();
    timeout(DEADLINE, task).await???;
    Ok(())
}

#[tokio::test]
async fn exit_persists_registry_for_next_start() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, _handle, task) = start(test_config(tmp.path())).await?;

    client::put(&addr, "a.txt", b"alpha".to_vec()).await?;
    client::put(&addr, "b.txt", b"beta".to_vec()).await?;
    client::exit(&addr).await?;

    let report = timeout(DEADLINE, task).await???;
    assert!(report.persisted);
    assert_eq!(report.aborted, 0);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("registry.txt"))?,
        "0:a.txt\n1:b.txt\n"
    );

    // A fresh server picks the listing back up
    let (addr, handle, task) = start(test_config(tmp.path())).await?;
    assert_eq!(
        client::get(&addr, Lookup::ById, "1").await?,
        Response::Content(b"beta".to_vec())
    );
    assert_eq!(client::put(&addr, "c.txt", b"gamma".to_vec()).await?, Response::Stored(2));
    handle.trigger();
    timeout(DEADLINE, task).await???;
    Ok(())
}

#[tokio::test]
async fn malformed_request_gets_no_response() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let (addr, handle, task) = start(test_config(tmp.path())).await?;

    let mut stream = TcpStream::connect(&addr).await?;
    stream.write_all(&utf("LIST")).await?;
    assert_closed_without_reply(stream).await?;

    // Unknown lookup mode is rejected the same way
    let mut stream = TcpStream::connect(&addr).await?;
    let mut bytes = utf("GET");
    bytes.extend(utf("BY_SIZE"));
    bytes.extend(utf("10"));
    stream.write_all(&bytes).await?;
    assert_closed_without_reply(stream).await?;

    // Server keeps serving
    assert_eq!(client::put(&addr, "ok.txt", b"x".to_vec()).await?, Response::Stored(0));

    handle.trigger();
    timeout(DEADLINE, task).await???;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_distinct_ids() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = ServerConfig {
        workers: 3,
        ..test_config(tmp.path())
    };
    let (addr, handle, task) = start(config).await?;

    let mut clients = tokio::task::JoinSet::new();
    for i in 0..24u8 {
        let addr = addr.clone();
        clients.spawn(async move { client::put(&addr, &format!("f{i}.bin"), vec![i; 64]).await });
    }
    let mut ids = std::collections::HashSet::new();
    while let Some(res) = clients.join_next().await {
        match res?? {
            Response::Stored(id) => assert!(ids.insert(id), "duplicate id {id}"),
            other => panic!("unexpected response {other:?}"),
        }
    }
    assert_eq!(ids.len(), 24);
    assert_eq!(ids.iter().copied().max(), Some(23));

    handle.trigger();
    let report = timeout(DEADLINE, task).await???;
    assert_eq!(report.entries, 24);
    Ok(())
}

#[tokio::test]
async fn shutdown_aborts_stalled_exchange_then_saves() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = ServerConfig {
        shutdown_grace_ms: 200,
        ..test_config(tmp.path())
    };
    let (addr, _handle, task) = start(config).await?;
    client::put(&addr, "kept.txt", b"k".to_vec()).await?;

    // Half a PUT: the worker blocks waiting for the rest of the blob
    let mut stalled = TcpStream::connect(&addr).await?;
    let mut bytes = utf("PUT");
    bytes.extend(utf("never.txt"));
    bytes.extend_from_slice(&1000i32.to_be_bytes());
    stalled.write_all(&bytes).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client::exit(&addr).await?;
    let report = timeout(DEADLINE, task).await???;
    assert_eq!(report.aborted, 1);
    assert!(report.persisted);
    assert_eq!(std::fs::read_to_string(tmp.path().join("registry.txt"))?, "0:kept.txt\n");
    assert!(!tmp.path().join("data/never.txt").exists());
    Ok(())
}

#[tokio::test]
async fn idle_peer_is_dropped_after_io_timeout() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = ServerConfig {
        io_timeout_ms: Some(100),
        ..test_config(tmp.path())
    };
    let (addr, handle, task) = start(config).await?;

    let idle = TcpStream::connect(&addr).await?;
    assert_closed_without_reply(idle).await?;

    handle.trigger();
    timeout(DEADLINE, task).await???;
    Ok(())
}

#[tokio::test]
async fn audit_log_records_outcomes() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = ServerConfig {
        audit_log: Some(tmp.path().join("audit.log")),
        ..test_config(tmp.path())
    };
    let (addr, _handle, task) = start(config).await?;

    client::put(&addr, "a.txt", b"abc".to_vec()).await?;
    client::get(&addr, Lookup::ByName, "nope.txt").await?;
    client::exit(&addr).await?;
    timeout(DEADLINE, task).await???;

    let log = std::fs::read_to_string(tmp.path().join("audit.log"))?;
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("PUT id=0 name=a.txt bytes=3"));
    assert!(lines[1].ends_with("REJECT action=GET target=BY_NAME:nope.txt status=404"));
    assert!(lines[2].ends_with("SHUTDOWN entries=1 persisted=true"));
    Ok(())
}
