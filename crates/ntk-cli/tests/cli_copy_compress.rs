use ntk_root::{CompressionSetting, RootFile, RootWriter, Shape, TreeWriter, Values, count_entries_slow};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_copy-compress"))
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("ntk_cli_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn write_fixture(path: &Path, tree: &str, n: usize) {
    let mut file = RootWriter::create(path, CompressionSetting::default()).unwrap();
    TreeWriter::new(tree, "")
        .with_basket_entries(100)
        .column("event", Shape::Scalar, Values::I64((0..n as i64).collect()))
        .column("weight", Shape::Scalar, Values::F32(vec![0.5; n]))
        .write(&mut file)
        .unwrap();
    file.close().unwrap();
}

#[test]
fn copies_tree_at_max_compression() {
    let dir = tmp_dir("copy_ok");
    let (src, dst) = (dir.join("in.root"), dir.join("out.root"));
    write_fixture(&src, "AnalysisTree", 1000);

    let out = run(&[src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert!(out.status.success(), "copy failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    assert!(out.stdout.is_empty(), "unexpected stdout: {}", String::from_utf8_lossy(&out.stdout));

    let f = RootFile::open(&dst).unwrap();
    assert_eq!(f.header().compress, 209);
    let tree = f.get_tree("AnalysisTree").unwrap();
    assert!(tree.branches.iter().all(|b| b.compress == 209));
    assert_eq!(count_entries_slow(&f, "AnalysisTree").unwrap(), 1000);
    assert_eq!(f.branch_data(&tree, "event").unwrap(), (0..1000).map(|i| i as f64).collect::<Vec<_>>());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn existing_destination_is_replaced() {
    let dir = tmp_dir("copy_recreate");
    let (src, dst) = (dir.join("in.root"), dir.join("out.root"));
    write_fixture(&src, "AnalysisTree", 10);
    write_fixture(&dst, "Stale", 5);

    let out = run(&["--threads", "2", src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert!(out.status.success(), "copy failed, stderr={}", String::from_utf8_lossy(&out.stderr));

    let keys = RootFile::open(&dst).unwrap().list_keys();
    assert_eq!(keys.iter().map(|k| k.name.as_str()).collect::<Vec<_>>(), vec!["AnalysisTree"]);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_source_creates_no_destination() {
    let dir = tmp_dir("copy_missing");
    let (src, dst) = (dir.join("nope.root"), dir.join("out.root"));

    let out = run(&[src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Couldn't open source"), "stderr={}", stderr);
    assert!(stderr.contains("nope.root"), "stderr={}", stderr);
    assert!(!dst.exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn source_without_tree_creates_no_destination() {
    let dir = tmp_dir("copy_no_tree");
    let (src, dst) = (dir.join("in.root"), dir.join("out.root"));
    write_fixture(&src, "OtherTree", 10);

    let out = run(&[src.to_str().unwrap(), dst.to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Couldn't get tree from"));
    assert!(!dst.exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn wrong_argument_count_touches_nothing() {
    let dir = tmp_dir("copy_usage");
    let src = dir.join("in.root");
    write_fixture(&src, "AnalysisTree", 10);
    let before = std::fs::read(&src).unwrap();

    let one = run(&[src.to_str().unwrap()]);
    assert!(!one.status.success());
    assert!(String::from_utf8_lossy(&one.stderr).contains("Usage"));

    let a = dir.join("a.root");
    let b = dir.join("b.root");
    let c = dir.join("c.root");
    let four = run(&[src.to_str().unwrap(), a.to_str().unwrap(), b.to_str().unwrap(), c.to_str().unwrap()]);
    assert!(!four.status.success());
    assert!(!a.exists() && !b.exists() && !c.exists());
    assert_eq!(std::fs::read(&src).unwrap(), before);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn copying_onto_the_source_leaves_it_intact() {
    let dir = tmp_dir("copy_onto_self");
    let src = dir.join("in.root");
    write_fixture(&src, "AnalysisTree", 300);
    let before = std::fs::read(&src).unwrap();

    let spelled_differently = dir.join(".").join("in.root");
    for dest in [&src, &spelled_differently] {
        let out = run(&[src.to_str().unwrap(), dest.to_str().unwrap()]);
        assert!(!out.status.success());
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains("Couldn't open destination"), "stderr={}", stderr);
        assert!(stderr.contains("it is the source file"), "stderr={}", stderr);
        assert_eq!(std::fs::read(&src).unwrap(), before);
    }

    let f = RootFile::open(&src).unwrap();
    assert_eq!(count_entries_slow(&f, "AnalysisTree").unwrap(), 300);
    std::fs::remove_dir_all(&dir).unwrap();
}
