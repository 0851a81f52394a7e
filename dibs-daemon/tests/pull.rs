use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dibs_bus::{MemoryBus, ModuleEvents};
use dibs_core::{ClientConfig, CommandsConfig, EventKind, GitConfig, ModuleName};
use dibs_daemon::{run_client_with, ModulePuller};
use dibs_sync::{Author, GitVcs, Vcs};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn name(raw: &str) -> ModuleName {
    ModuleName::parse(raw).expect("name")
}

/// Bare remotes plus a working copy that plays the other developer.
struct Upstream {
    remotes: TempDir,
    work: TempDir,
}

impl Upstream {
    fn new(module: &str) -> Self {
        let remotes = TempDir::new().expect("remotes");
        let bare = remotes.path().join(module);
        fs::create_dir_all(&bare).expect("bare dir");
        GitVcs.init_bare(&bare).expect("bare");

        let work = TempDir::new().expect("work");
        GitVcs.open_or_init(work.path()).expect("work repo");
        GitVcs
            .ensure_remote(work.path(), "origin", &bare.to_string_lossy())
            .expect("remote");
        Self { remotes, work }
    }

    fn git(&self) -> GitConfig {
        GitConfig {
            base_url: self.remotes.path().to_string_lossy().into_owned(),
            ..GitConfig::default()
        }
    }

    fn push(&self, files: &[(&str, Option<&str>)]) {
        for (path, contents) in files {
            let target = self.work.path().join(path);
            match contents {
                Some(text) => fs::write(&target, text).expect("write"),
                None => fs::remove_file(&target).expect("remove"),
            }
        }
        let author = Author {
            name: "upstream".into(),
            email: "upstream@example.com".into(),
        };
        GitVcs
            .commit_all(self.work.path(), "up_synced", &author)
            .expect("commit");
        GitVcs.push(self.work.path(), "origin", None).expect("push");
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn read(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

#[tokio::test]
async fn pushed_module_is_mirrored_into_pull_dir() {
    let upstream = Upstream::new("shared/lib");
    let pull_dir = TempDir::new().expect("pull");
    let bus = MemoryBus::new();
    let events = ModuleEvents::new(Arc::new(bus.clone()), "dibs");
    let shutdown = CancellationToken::new();

    let puller = ModulePuller::new(
        [name("shared/lib")],
        pull_dir.path(),
        upstream.git(),
        Arc::new(GitVcs),
    );
    let mirror: PathBuf = puller.module_dir(&name("shared/lib"));
    let worker = puller
        .start(&events, shutdown.clone())
        .await
        .expect("start");

    upstream.push(&[("lib.go", Some("package lib\n")), ("old.go", Some("package lib\n"))]);
    events
        .publish(EventKind::ModulePushed, &name("other/service"))
        .await
        .expect("publish");
    events
        .publish(EventKind::ModulePushed, &name("shared/lib"))
        .await
        .expect("publish");
    wait_until("first pull", || read(&mirror.join("lib.go")).is_some()).await;
    assert!(
        !pull_dir.path().join("other").exists(),
        "modules outside the pull list are left alone"
    );

    upstream.push(&[("lib.go", Some("package lib // v2\n")), ("old.go", None)]);
    events
        .publish(EventKind::ModulePushed, &name("shared/lib"))
        .await
        .expect("publish");
    wait_until("second pull", || {
        read(&mirror.join("lib.go")).as_deref() == Some("package lib // v2\n")
    })
    .await;
    assert!(!mirror.join("old.go").exists());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), worker)
        .await
        .expect("puller stops")
        .expect("join");
}

#[tokio::test]
async fn client_pulls_listed_modules_and_keeps_them_out_of_its_pipeline() {
    let upstream = Upstream::new("shared/lib");
    upstream.push(&[("lib.go", Some("package lib\n"))]);

    let src = TempDir::new().expect("src");
    fs::write(src.path().join("go.mod"), "module services/api\n").expect("go.mod");
    fs::write(src.path().join("main.go"), "package main\n").expect("main.go");
    let own_remote = upstream.remotes.path().join("services/api");
    fs::create_dir_all(&own_remote).expect("own remote dir");
    GitVcs.init_bare(&own_remote).expect("own remote");
    let push = TempDir::new().expect("push");
    let pull_dir = src.path().join("vendor");

    let config = ClientConfig {
        module_file: src.path().join("go.mod"),
        src_dir: src.path().to_path_buf(),
        push_dir: push.path().join("stage"),
        watch_dir: src.path().to_path_buf(),
        commands: CommandsConfig {
            build: "true".into(),
            test: "true".into(),
            start: "sleep 30".into(),
        },
        git: upstream.git(),
        debounce_ms: 50,
        pull: vec![name("shared/lib")],
        pull_dir: pull_dir.clone(),
        ..ClientConfig::default()
    };
    let bus = MemoryBus::new();
    let shutdown = CancellationToken::new();
    let client = tokio::spawn(run_client_with(
        config,
        name("services/api"),
        Arc::new(bus.clone()),
        shutdown.clone(),
    ));

    let pulled = pull_dir.join("shared/lib/lib.go");
    wait_until("startup pull", || pulled.exists()).await;

    let started = |bus: &MemoryBus| bus.history_for("dibs:module_started").len();
    wait_until("startup run", || started(&bus) >= 1).await;
    fs::write(src.path().join("main.go"), "package main // edited\n").expect("edit");
    wait_until("change-triggered run", || started(&bus) >= 2).await;

    let stage = push.path().join("stage");
    assert!(stage.join("main.go").exists());
    assert!(!stage.join("vendor").exists(), "pulled modules are never staged");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(20), client)
        .await
        .expect("client stops")
        .expect("join")
        .expect("clean exit");
}
