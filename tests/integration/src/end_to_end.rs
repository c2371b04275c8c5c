//! End-to-end flows: write a value, dispatch, observe the regenerated files.

use assert_fs::prelude::*;
use confreg_core::{Autoload, RegistryHandle, Settings, filter};
use confreg_handlers::{Commands, Dispatcher, HandlerIndex};
use confreg_test_utils::TestRegistry;
use predicates::prelude::*;

fn mail_and_hosts() -> TestRegistry {
    let fixture = TestRegistry::new();
    fixture.write_layer("base.conf", &[("hostname", "master"), ("mail/alias/root", "admin")]);
    fixture.write_template(
        "etc/hosts",
        "@%@WARNING=# @%@\n127.0.1.1 @%@hostname@%@\n",
    );
    fixture.write_template("etc/aliases.d/10root", "root: @%@mail/alias/root@%@\n");
    fixture.write_template("etc/aliases.d/20web", "web: @%@mail/alias/web@%@\n");
    fixture.write_info("base", "Type: file\nFile: etc/hosts\nMode: 0644\n");
    fixture.write_info(
        "mail",
        "Type: multifile\nMultifile: etc/aliases\nVariables: mail/alias/*\n\n\
         Type: subfile\nMultifile: etc/aliases\nSubfile: etc/aliases.d/10root\n\n\
         Type: subfile\nMultifile: etc/aliases\nSubfile: etc/aliases.d/20web\n",
    );
    fixture
}

#[test]
fn handle_save_then_dispatch_regenerates_only_interested_files() {
    let _ = confreg_core::logging::init();
    let fixture = mail_and_hosts();
    let settings = Settings::with_root(fixture.root());
    let dispatcher = Dispatcher::new(settings.clone());
    let initial = RegistryHandle::read_only(&settings, Autoload::Once)
        .unwrap()
        .snapshot()
        .unwrap();
    dispatcher.commit::<&str>(&initial, &[]).unwrap();

    let hosts_before = fixture.read_target("etc/hosts");

    let mut handle = RegistryHandle::writable(&settings, None, Autoload::Manual).unwrap();
    let changes = {
        let _lock = handle.lock().unwrap();
        handle.load().unwrap();
        handle.set("mail/alias/web", "webmaster").unwrap();
        handle.save().unwrap()
    };
    let report = dispatcher.dispatch(&handle.snapshot().unwrap(), &changes).unwrap();

    assert_eq!(report.handlers().collect::<Vec<_>>(), vec!["multifile:etc/aliases"]);
    assert_eq!(fixture.read_target("etc/aliases"), "root: admin\nweb: webmaster\n");
    assert_eq!(fixture.read_target("etc/hosts"), hosts_before);
}

#[test]
fn generated_file_carries_the_warning_banner() {
    let fixture = mail_and_hosts();
    let commands = Commands::new(Settings::with_root(fixture.root()));
    commands.commit(&["/etc/hosts"]).unwrap();

    let template = fixture.templates_dir().join("files/etc/hosts");
    let hosts = assert_fs::fixture::ChildPath::new(fixture.target_dir().join("etc/hosts"));
    hosts.assert(predicate::path::exists());
    hosts.assert(predicate::str::contains(format!("# \t{}", template.display())));

    let content = fixture.read_target("etc/hosts");
    assert!(predicate::str::starts_with("# Warning: This file is auto-generated").eval(&content));
    assert!(predicate::str::ends_with("127.0.1.1 master\n").eval(&content));
}

#[test]
fn deleting_the_cache_only_costs_a_rebuild() {
    let fixture = mail_and_hosts();
    let settings = Settings::with_root(fixture.root());
    let commands = Commands::new(settings.clone());

    commands.update().unwrap();
    std::fs::remove_file(&settings.cache_file).unwrap();

    let report = commands.set(&["hostname=renamed"], None).unwrap();
    assert!(report.dispatch.is_success());
    assert!(fixture.read_target("etc/hosts").ends_with("127.0.1.1 renamed\n"));
    assert!(settings.cache_file.exists());
}

#[test]
fn cache_file_is_readable_json() {
    let fixture = mail_and_hosts();
    let settings = Settings::with_root(fixture.root());
    let index = HandlerIndex::build(&settings).unwrap();

    let text = std::fs::read_to_string(&settings.cache_file).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["token"], index.token());
    assert_eq!(json["handlers"].as_array().map(Vec::len), Some(2));
}

#[test]
fn custom_layer_mode_reads_and_writes_one_file() {
    let fixture = mail_and_hosts();
    let custom = assert_fs::TempDir::new().unwrap();
    custom.child("custom.conf").write_str("hostname: elsewhere\n").unwrap();

    let mut settings = Settings::with_root(fixture.root());
    settings.custom_file = Some(custom.child("custom.conf").path().to_path_buf());
    let commands = Commands::new(settings);

    assert_eq!(commands.get("hostname").unwrap().as_deref(), Some("elsewhere"));
    assert_eq!(commands.get("mail/alias/root").unwrap(), None);

    commands.set(&["extra=1"], None).unwrap();
    custom.child("custom.conf").assert(predicate::str::contains("extra: 1\n"));
    fixture.assert_layer_contains("base.conf", "hostname", "master");
}

#[test]
fn shell_output_round_trips_through_filters() {
    let fixture = mail_and_hosts();
    let commands = Commands::new(Settings::with_root(fixture.root()));

    let dump = commands.dump().unwrap();
    assert_eq!(
        filter::filter_keys_only(&dump),
        vec!["hostname", "mail/alias/root"]
    );
    assert_eq!(
        commands.shell(&[]).unwrap(),
        vec!["hostname=master", "mail_alias_root=admin"]
    );
}
