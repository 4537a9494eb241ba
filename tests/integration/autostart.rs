use std::path::Path;

use nodectl::cli::Verb;
use nodectl::config::model::Settings;
use nodectl::config::resolve::{resolve, Network};
use nodectl::orchestrator::Orchestrator;
use nodectl::ui::report::Reporter;

use crate::common::{SimHost, TestInstall, PROGRAM};

fn expected_entry(home: &Path, network: &str) -> String {
    format!(
        "@reboot {PROGRAM} start {network} --home {home} > {home}/logs/cron.log 2>&1",
        home = home.display()
    )
}

#[tokio::test]
async fn registers_reboot_entry_and_keeps_other_lines() {
    let install = TestInstall::new();
    let ctx = install.context(Network::Mainnet);
    let host = SimHost::new(&ctx);
    host.update(|s| {
        s.crontab = Some(format!(
            "0 3 * * * /usr/bin/backup\n@reboot {PROGRAM} start mainnet --home /old\n"
        ))
    });
    let (report, lines) = Reporter::captured();

    assert!(Orchestrator::new(&ctx, &host, &report).autostart().register().await);

    assert_eq!(
        host.read(|s| s.crontab.clone()).unwrap(),
        format!(
            "0 3 * * * /usr/bin/backup\n{}\n",
            expected_entry(install.home(), "mainnet")
        )
    );
    assert!(lines.contains("\u{221a} Crontab updated successfully."));
}

#[tokio::test]
async fn registering_twice_leaves_one_entry() {
    let install = TestInstall::new();
    let ctx = install.context(Network::Testnet);
    let host = SimHost::new(&ctx);
    let (report, _lines) = Reporter::captured();
    let autostart = Orchestrator::new(&ctx, &host, &report).autostart();

    assert!(autostart.register().await);
    assert!(autostart.register().await);

    let crontab = host.read(|s| s.crontab.clone()).unwrap();
    assert_eq!(crontab, format!("{}\n", expected_entry(install.home(), "testnet")));
}

#[tokio::test]
async fn custom_descriptor_is_carried_into_entry() {
    let install = TestInstall::new();
    let custom = install.home().join("custom.json");
    std::fs::write(
        &custom,
        r#"{"apps": [{"name": "lisk-custom", "args": ["-c", "config/devnet/config.json"]}]}"#,
    )
    .unwrap();
    let mut ctx = install.context(Network::Devnet);
    ctx.config = resolve(install.home(), Network::Devnet, &Settings::default(), Some(&custom)).unwrap();
    let host = SimHost::new(&ctx);
    let (report, _lines) = Reporter::captured();

    let entry = Orchestrator::new(&ctx, &host, &report).autostart().entry();

    assert!(entry.contains(&format!(" -p {} ", custom.display())), "{entry}");
}

#[tokio::test]
async fn missing_crontab_binary_is_not_fatal() {
    let install = TestInstall::new();
    let ctx = install.context(Network::Mainnet);
    let host = SimHost::new(&ctx);
    host.update(|s| s.crontab_missing = true);
    let (report, lines) = Reporter::captured();

    assert!(!Orchestrator::new(&ctx, &host, &report).autostart().register().await);
    assert!(lines.contains("X Failed to execute crontab."));
}

#[tokio::test(start_paused = true)]
async fn coldstart_continues_after_crontab_failure() {
    let install = TestInstall::new();
    let ctx = install.context(Network::Mainnet);
    let host = SimHost::new(&ctx);
    host.update(|s| s.crontab_install_fails = true);
    let (report, lines) = Reporter::captured();

    Orchestrator::new(&ctx, &host, &report)
        .run(Verb::Coldstart)
        .await
        .unwrap();

    assert!(lines.contains("X Failed to update crontab."));
    assert!(lines.contains("\u{221a} lisk.mainnet started successfully."));
}
