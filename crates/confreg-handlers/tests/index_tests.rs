//! Index matching scenarios over a descriptor corpus on disk

use confreg_core::Settings;
use confreg_handlers::{HandlerIndex, HandlerKind};
use confreg_test_utils::TestRegistry;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn corpus() -> (TestRegistry, HandlerIndex) {
    let fixture = TestRegistry::new();
    fixture.write_template("etc/aliases.d/10root", "root: @%@mail/alias/root@%@\n");
    fixture.write_info(
        "mail",
        "Type: multifile\nMultifile: etc/aliases\nVariables: mail/alias/*\n\nType: subfile\nMultifile: etc/aliases\nSubfile: etc/aliases.d/10root\n",
    );
    fixture.write_info("foo", "Type: module\nModule: foo\nVariables: foo/*\n");
    fixture.write_info("net", "Type: script\nScript: restart-net\nVariables: interfaces/.*/address\n");
    let index = HandlerIndex::build(&Settings::with_root(fixture.root())).unwrap();
    (fixture, index)
}

fn matched(index: &HandlerIndex, keys: &[&str]) -> Vec<String> {
    index
        .matching(keys)
        .into_iter()
        .map(|e| e.handler().id.clone())
        .collect()
}

#[rstest]
#[case(&["foo/bar"], &["module:foo"])]
#[case(&["baz/qux"], &[])]
#[case(&["foo/bar/deeper"], &[])]
#[case(&["mail/alias/root"], &["multifile:etc/aliases"])]
#[case(&["mail/alias/postmaster"], &["multifile:etc/aliases"])]
#[case(&["interfaces/eth0/address"], &["script:restart-net"])]
#[case(&["interfaces/eth0/address", "foo/x", "mail/alias/a"], &["multifile:etc/aliases", "module:foo", "script:restart-net"])]
fn changed_keys_select_handlers(#[case] keys: &[&str], #[case] expected: &[&str]) {
    let (_fixture, index) = corpus();
    assert_eq!(matched(&index, keys), expected);
}

#[test]
fn each_handler_listed_once_per_change_set() {
    let (_fixture, index) = corpus();
    let ids = matched(&index, &["foo/a", "foo/b", "foo/c"]);
    assert_eq!(ids, vec!["module:foo"]);
}

#[test]
fn cached_index_matches_fresh_build() {
    let (fixture, built) = corpus();
    let settings = Settings::with_root(fixture.root());
    let cached = HandlerIndex::load_or_rebuild(&settings).unwrap();

    assert_eq!(cached.token(), built.token());
    let kinds: Vec<HandlerKind> = cached.iter().map(|e| e.handler().kind).collect();
    assert_eq!(kinds, vec![HandlerKind::Multifile, HandlerKind::Module, HandlerKind::Script]);
    assert_eq!(matched(&cached, &["mail/alias/x"]), matched(&built, &["mail/alias/x"]));
}

#[test]
fn touching_a_template_invalidates_the_cache() {
    let (fixture, built) = corpus();
    let settings = Settings::with_root(fixture.root());
    fixture.write_template("etc/aliases.d/20web", "web: @%@mail/alias/web@%@ and more\n");
    let reloaded = HandlerIndex::load_or_rebuild(&settings).unwrap();
    assert_ne!(reloaded.token(), built.token());
}
