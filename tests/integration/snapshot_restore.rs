use nodectl::cli::Verb;
use nodectl::config::resolve::Network;
use nodectl::error::exit_code;
use nodectl::orchestrator::Orchestrator;
use nodectl::ui::report::Reporter;

use crate::common::{write_gzip, SimHost, TestInstall};

#[tokio::test(start_paused = true)]
async fn existing_local_file_skips_download() {
    let install = TestInstall::new();
    let snapshot = install.home().join("mine.db.gz");
    write_gzip(&snapshot, "INSERT INTO blocks VALUES (7);\n");
    let ctx = install.context_with(Network::Mainnet, None, Some(&snapshot), false);
    let host = SimHost::new(&ctx);
    let (report, lines) = Reporter::captured();

    Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Rebuild)
        .await
        .unwrap();

    assert!(host.read(|s| s.downloads.is_empty()));
    assert_eq!(host.read(|s| s.restores.clone()), vec![snapshot.clone()]);
    assert!(lines.contains("\u{221a} Using local snapshot."));
    assert!(lines.contains(&format!("Restoring blockchain with {}", snapshot.display())));
}

#[tokio::test(start_paused = true)]
async fn missing_local_file_is_downloaded_under_its_name() {
    let install = TestInstall::new();
    let snapshot = install.home().join("custom.db.gz");
    let ctx = install.context_with(Network::Devnet, None, Some(&snapshot), false);
    let host = SimHost::new(&ctx);
    let (report, _lines) = Reporter::captured();

    Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Rebuild)
        .await
        .unwrap();

    assert_eq!(
        host.read(|s| s.downloads.clone()),
        vec![(
            "https://downloads.lisk.io/lisk/dev/custom.db.gz".to_string(),
            snapshot.clone()
        )]
    );
    assert_eq!(host.read(|s| s.restores.clone()), vec![snapshot]);
}

#[tokio::test(start_paused = true)]
async fn bundled_snapshot_skips_download() {
    let install = TestInstall::new();
    let bundled = install.home().join("etc/blockchain.db.gz");
    write_gzip(&bundled, "INSERT INTO blocks VALUES (1);\n");
    let other = install.home().join("mine.db.gz");
    write_gzip(&other, "INSERT INTO blocks VALUES (2);\n");
    let ctx = install.context_with(Network::Testnet, None, Some(&other), true);
    let host = SimHost::new(&ctx);
    let (report, _lines) = Reporter::captured();

    Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Rebuild)
        .await
        .unwrap();

    assert!(host.read(|s| s.downloads.is_empty()));
    assert_eq!(host.read(|s| s.restores.clone()), vec![bundled]);
}

#[tokio::test]
async fn failed_download_is_fatal_and_leaves_no_file() {
    let install = TestInstall::new();
    let ctx = install.context(Network::Mainnet);
    let host = SimHost::new(&ctx);
    host.update(|s| s.download_fails = true);
    let (report, lines) = Reporter::captured();

    let err = Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Rebuild)
        .await
        .unwrap_err();

    assert_eq!(exit_code(&err), 1);
    assert!(!install.home().join("blockchain.db.gz").exists());
    assert!(host.read(|s| s.restores.is_empty()));
    assert!(!host.ran("pm2 start"));
    assert!(lines.contains("X Failed to download blockchain snapshot."));
}

#[tokio::test]
async fn stale_snapshot_is_replaced_before_download() {
    let install = TestInstall::new();
    let dest = install.home().join("blockchain.db.gz");
    std::fs::write(&dest, b"stale").unwrap();
    let ctx = install.context(Network::Mainnet);
    let host = SimHost::new(&ctx);
    let (report, _lines) = Reporter::captured();

    Orchestrator::new(&ctx, &host, &report)
        .fetcher()
        .fetch()
        .await
        .unwrap();

    assert_ne!(std::fs::read(&dest).unwrap(), b"stale");
}

#[tokio::test]
async fn failed_restore_is_fatal() {
    let install = TestInstall::new();
    let ctx = install.context(Network::Mainnet);
    let host = SimHost::new(&ctx);
    host.update(|s| s.restore_fails = true);
    let (report, lines) = Reporter::captured();

    let err = Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Rebuild)
        .await
        .unwrap_err();

    assert_eq!(exit_code(&err), 1);
    assert!(lines.contains("X Failed to restore blockchain."));
    assert!(!host.ran("pm2 start"));
}

#[tokio::test]
async fn missing_bundled_snapshot_fails_restore() {
    let install = TestInstall::new();
    let ctx = install.context_with(Network::Mainnet, None, None, true);
    let host = SimHost::new(&ctx);
    let (report, lines) = Reporter::captured();

    let err = Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Rebuild)
        .await
        .unwrap_err();

    assert_eq!(exit_code(&err), 1);
    assert!(lines.contains("X Failed to restore blockchain."));
    assert!(host.read(|s| s.restores.is_empty()));
}
