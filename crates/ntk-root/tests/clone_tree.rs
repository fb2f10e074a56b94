use ntk_root::{
    CloneOptions, CompressionSetting, RootFile, RootWriter, Shape, TreeWriter, Values, clone_tree,
    clone_tree_with, count_entries_fast, count_entries_slow,
};
use std::path::{Path, PathBuf};

fn tmp_dir(label: &str) -> PathBuf {
    let nanos =
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!("ntk-root-{}-{}-{}", label, std::process::id(), nanos));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A small analysis-style ntuple: event scalars, a jet collection and a
/// fixed-size vertex array, spread over several baskets.
fn write_ntuple(path: &Path, n_events: usize, setting: CompressionSetting) {
    let n_jets: Vec<i32> = (0..n_events).map(|i| (i % 4) as i32).collect();
    let total_jets: usize = n_jets.iter().map(|&n| n as usize).sum();

    let mut file = RootWriter::create(path, setting).unwrap();
    TreeWriter::new("AnalysisTree", "AnalysisTree")
        .with_basket_entries(64)
        .column("run", Shape::Scalar, Values::U32(vec![305_112; n_events]))
        .column("event", Shape::Scalar, Values::U64((0..n_events as u64).map(|e| 1_000_000 + e).collect()))
        .column("passTrigger", Shape::Scalar, Values::Bool((0..n_events).map(|i| i % 3 == 0).collect()))
        .column("nJet", Shape::Scalar, Values::I32(n_jets))
        .column("jetPt", Shape::Counted("nJet".into()), Values::F32((0..total_jets).map(|j| 20.0 + j as f32 * 0.25).collect()))
        .column("pv", Shape::Fixed(3), Values::F64((0..3 * n_events).map(|i| i as f64 * 1e-3).collect()))
        .write(&mut file)
        .unwrap();
    file.close().unwrap();
}

fn copy(src: &Path, dst: &Path) {
    let input = RootFile::open(src).unwrap();
    let mut out = RootWriter::create(dst, CompressionSetting::MAX).unwrap();
    clone_tree(&input, "AnalysisTree", &mut out).unwrap();
    out.close().unwrap();
}

#[test]
fn clone_is_lossless() {
    let dir = tmp_dir("lossless");
    let (src, dst) = (dir.join("in.root"), dir.join("out.root"));
    write_ntuple(&src, 500, CompressionSetting::default());
    copy(&src, &dst);

    let a = RootFile::open(&src).unwrap();
    let b = RootFile::open(&dst).unwrap();
    let ta = a.get_tree("AnalysisTree").unwrap();
    let tb = b.get_tree("AnalysisTree").unwrap();

    assert_eq!(b.header().compress, 209);
    assert_eq!(tb.entries, ta.entries);
    assert_eq!(tb.branch_names(), ta.branch_names());
    for name in ta.branch_names() {
        let ra = a.branch_reader(&ta, name).unwrap().as_raw_entries().unwrap();
        let rb = b.branch_reader(&tb, name).unwrap().as_raw_entries().unwrap();
        assert_eq!(ra, rb, "branch {} differs after copy", name);
    }
    assert_eq!(
        b.branch_reader(&tb, "jetPt").unwrap().as_jagged_f64().unwrap(),
        a.branch_reader(&ta, "jetPt").unwrap().as_jagged_f64().unwrap()
    );

    assert_eq!(count_entries_fast(&b, "AnalysisTree").unwrap(), 500);
    assert_eq!(count_entries_slow(&b, "AnalysisTree").unwrap(), 500);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn destination_only_holds_the_tree() {
    let dir = tmp_dir("keys");
    let (src, dst) = (dir.join("in.root"), dir.join("out.root"));
    {
        let mut file = RootWriter::create(&src, CompressionSetting::default()).unwrap();
        TreeWriter::new("Other", "")
            .column("x", Shape::Scalar, Values::F64(vec![1.0; 5]))
            .write(&mut file)
            .unwrap();
        TreeWriter::new("AnalysisTree", "")
            .column("x", Shape::Scalar, Values::F64(vec![2.0; 7]))
            .write(&mut file)
            .unwrap();
        file.close().unwrap();
    }
    copy(&src, &dst);

    let out = RootFile::open(&dst).unwrap();
    let keys = out.list_keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].name, "AnalysisTree");
    assert_eq!(keys[0].class_name, "TTree");
    assert!(out.streamer_info().unwrap().is_some());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn copying_a_copy_keeps_counts() {
    let dir = tmp_dir("idempotent");
    let (a, b, c) = (dir.join("a.root"), dir.join("b.root"), dir.join("c.root"));
    write_ntuple(&a, 300, CompressionSetting::NONE);
    copy(&a, &b);
    copy(&b, &c);

    let fb = RootFile::open(&b).unwrap();
    let fc = RootFile::open(&c).unwrap();
    assert_eq!(count_entries_slow(&fc, "AnalysisTree").unwrap(), 300);
    let tb = fb.get_tree("AnalysisTree").unwrap();
    let tc = fc.get_tree("AnalysisTree").unwrap();
    assert_eq!(tb.zip_bytes, tc.zip_bytes);
    for name in tb.branch_names() {
        assert_eq!(
            fb.branch_reader(&tb, name).unwrap().as_raw_entries().unwrap(),
            fc.branch_reader(&tc, name).unwrap().as_raw_entries().unwrap()
        );
    }
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn empty_tree_copies() {
    let dir = tmp_dir("empty");
    let (src, dst) = (dir.join("in.root"), dir.join("out.root"));
    write_ntuple(&src, 0, CompressionSetting::default());
    copy(&src, &dst);

    let out = RootFile::open(&dst).unwrap();
    let tree = out.get_tree("AnalysisTree").unwrap();
    assert_eq!(tree.entries, 0);
    assert_eq!(tree.branches.len(), 6);
    assert_eq!(count_entries_fast(&out, "AnalysisTree").unwrap(), 0);
    assert_eq!(count_entries_slow(&out, "AnalysisTree").unwrap(), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn parallel_clone_matches_sequential() {
    let dir = tmp_dir("parallel");
    let src = dir.join("in.root");
    write_ntuple(&src, 1000, CompressionSetting::default());
    let input = RootFile::open(&src).unwrap();

    let mut bytes = Vec::new();
    for (threads, name) in [(1, "seq.root"), (3, "par.root")] {
        // Same name length, so both files place records at the same offsets.
        let dst = dir.join(name);
        let mut out = RootWriter::create(&dst, CompressionSetting::MAX).unwrap();
        clone_tree_with(&input, "AnalysisTree", &mut out, CloneOptions { threads }).unwrap();
        out.close().unwrap();
        let f = RootFile::open(&dst).unwrap();
        let t = f.get_tree("AnalysisTree").unwrap();
        bytes.push(t.branches.iter().map(|b| (b.basket_seek.clone(), b.basket_bytes.clone())).collect::<Vec<_>>());
    }
    assert_eq!(bytes[0], bytes[1]);
    std::fs::remove_dir_all(&dir).unwrap();
}
