//! Concurrent writers serialized by the layer lock

use confreg_core::{Autoload, RegistryHandle, Settings};
use confreg_handlers::Commands;
use confreg_test_utils::TestRegistry;
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 15;

#[test]
fn locked_read_modify_write_never_loses_updates() {
    let fixture = TestRegistry::new();
    fixture.write_layer("base.conf", &[("sentinel", "intact"), ("counter", "0")]);
    let settings = Settings::with_root(fixture.root());

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                let mut handle = RegistryHandle::writable(&settings, None, Autoload::Manual).unwrap();
                for _ in 0..ROUNDS {
                    let _lock = handle.lock().unwrap();
                    handle.load().unwrap();
                    assert_eq!(handle.get("sentinel").unwrap().as_deref(), Some("intact"));
                    let counter: usize = handle.get("counter").unwrap().unwrap().parse().unwrap();
                    handle.set("counter", &(counter + 1).to_string()).unwrap();
                    handle.set("counter/derived", &format!("{}", (counter + 1) * 2)).unwrap();
                    handle.save().unwrap();
                }
            });
        }

        scope.spawn(|| {
            let reader = RegistryHandle::read_only(&settings, Autoload::Always).unwrap();
            for _ in 0..THREADS * ROUNDS {
                assert_eq!(reader.get("sentinel").unwrap().as_deref(), Some("intact"));
            }
        });
    });

    let total = THREADS * ROUNDS;
    fixture.assert_layer_contains("base.conf", "counter", &total.to_string());
    fixture.assert_layer_contains("base.conf", "counter/derived", &(total * 2).to_string());
    fixture.assert_layer_contains("base.conf", "sentinel", "intact");
}

#[test]
fn concurrent_commands_keep_every_key_and_the_generated_file_current() {
    let fixture = TestRegistry::new();
    fixture.write_layer("base.conf", &[("sentinel", "intact")]);
    fixture.write_template("etc/sentinel", "@%@sentinel@%@\n");
    fixture.write_info("base", "Type: file\nFile: etc/sentinel\n");
    let settings = Settings::with_root(fixture.root());

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let commands = Commands::new(settings.clone());
            scope.spawn(move || {
                for round in 0..ROUNDS {
                    let report = commands
                        .set(&[format!("worker/{worker}/round={round}")], None)
                        .unwrap();
                    assert!(report.dispatch.is_empty());
                }
            });
        }
    });

    let commands = Commands::new(settings);
    for worker in 0..THREADS {
        assert_eq!(
            commands.get(&format!("worker/{worker}/round")).unwrap(),
            Some((ROUNDS - 1).to_string())
        );
    }

    commands.set(&["sentinel=changed"], None).unwrap();
    assert_eq!(fixture.read_target("etc/sentinel"), "changed\n");
}
