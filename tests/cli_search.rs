use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_index(dir: &Path) -> anyhow::Result<PathBuf> {
    let index = dir.join("targets.kmi");
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("createindex")
        .arg("tests/kmerfold/targets.fa")
        .arg(&index)
        .arg("--matrix")
        .arg("tests/kmerfold/abc.mat")
        .arg("-k")
        .arg("2");
    cmd.assert().success();
    Ok(index)
}

#[test]
fn command_search() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = create_index(temp.path())?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("tests/kmerfold/query.fa")
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;

    assert_eq!(
        stdout,
        "q0\tt0\t24\t0\t\n\
         q0\tt1\t8\t-1\t\n\
         q3\tt1\t24\t0\t\n\
         q3\tt0\t8\t1\t\n\
         q3\tt2\t8\t-2\t\n"
    );

    // q1 holds a letter outside the alphabet, q2 has no k-mer
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("query q1: invalid letter 'Z' at position 2"));
    assert!(stderr.contains("Searched 4 queries: 5 candidates, 1 failed"));

    Ok(())
}

#[test]
fn command_search_all_vs_all() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = create_index(temp.path())?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd.arg("search").arg(&index).output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("t0\tt0\t24\t0\t\n"));
    assert!(stdout.contains("t1\tt1\t24\t0\t\n"));
    assert!(stdout.contains("t2\tt2\t24\t0\t\n"));

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("--exclude-self")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(
        stdout,
        "t0\tt1\t8\t-1\t\n\
         t1\tt0\t8\t1\t\n\
         t1\tt2\t8\t-2\t\n\
         t2\tt1\t8\t0\t\n"
    );

    Ok(())
}

#[test]
fn command_search_max_seqs_keeps_self() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let input = temp.path().join("same.fa");
    let index = temp.path().join("same.kmi");
    fs::write(&input, ">s0\nABCAB\n>s1\nABCAB\n>s2\nABCAB\n")?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("createindex")
        .arg(&input)
        .arg(&index)
        .arg("--matrix")
        .arg("tests/kmerfold/abc.mat")
        .arg("-k")
        .arg("2");
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("--max-seqs")
        .arg("1")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(
        stdout,
        "s0\ts0\t32\t0\t\n\
         s1\ts1\t32\t0\t\n\
         s2\ts2\t32\t0\t\n"
    );

    Ok(())
}

#[test]
fn command_search_evalue() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = create_index(temp.path())?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("tests/kmerfold/query.fa")
        .arg("--mu")
        .arg("10")
        .arg("--lambda")
        .arg("0.5")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("q0\tt0\t24\t0\t9.119e-4\n"));
    assert!(stdout.contains("q0\tt1\t8\t-1\t2.718e0\n"));

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("tests/kmerfold/query.fa")
        .arg("--mu")
        .arg("10")
        .arg("--lambda")
        .arg("0.5")
        .arg("--evalue")
        .arg("0.01")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout.lines().count(), 2);
    assert!(stdout.contains("q0\tt0\t24"));
    assert!(stdout.contains("q3\tt1\t24"));

    // no parameters to compute e-values with
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("search")
        .arg(&index)
        .arg("--evalue")
        .arg("0.01")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--evalue needs"));

    Ok(())
}

#[test]
fn command_search_parallel_same_output() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("pep.kmi");
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("createindex")
        .arg("tests/kmerfold/pep.fa")
        .arg(&index)
        .arg("-k")
        .arg("3");
    cmd.assert().success();

    let mut outputs = vec![];
    for parallel in ["1", "4"] {
        let mut cmd = Command::cargo_bin("kmerfold")?;
        let output = cmd
            .arg("search")
            .arg(&index)
            .arg("tests/kmerfold/pep.fa")
            .arg("--diag-band")
            .arg("2")
            .arg("--parallel")
            .arg(parallel)
            .output()?;
        assert!(output.status.success());
        outputs.push(String::from_utf8(output.stdout)?);
    }
    assert_eq!(outputs[0], outputs[1]);

    // every sequence finds itself first
    let firsts: Vec<&str> = outputs[0]
        .lines()
        .filter(|l| {
            let f: Vec<&str> = l.split('\t').collect();
            f[0] == f[1]
        })
        .collect();
    assert_eq!(firsts.len(), 40);

    Ok(())
}

#[test]
fn command_search_rejects_bad_index() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = create_index(temp.path())?;

    // not an index at all
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("search")
        .arg("tests/kmerfold/targets.fa")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a kmerfold index"));

    // another format version
    let mut bytes = fs::read(&index)?;
    bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
    let old = temp.path().join("old.kmi");
    fs::write(&old, &bytes)?;
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("search")
        .arg(&old)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "version mismatch: expected 1, found 2",
        ));

    // parameters other than the ones of the index
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("search")
        .arg(&index)
        .arg("-k")
        .arg("3")
        .assert()
        .failure()
        .stderr(predicate::str::contains("parameter mismatch"));

    // a damaged posting: first one of the first bucket points nowhere
    let mut bytes = fs::read(&index)?;
    let header_len = u32::from_le_bytes(bytes[12..16].try_into()?) as usize;
    let n_buckets = u64::from_le_bytes(bytes[40..48].try_into()?) as usize;
    let at = header_len + n_buckets * 24;
    bytes[at..at + 4].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
    let damaged = temp.path().join("damaged.kmi");
    fs::write(&damaged, &bytes)?;
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("search")
        .arg(&damaged)
        .arg("tests/kmerfold/query.fa")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("index file corrupted"));

    Ok(())
}

#[test]
fn command_search_max_queries() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = create_index(temp.path())?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("tests/kmerfold/query.fa")
        .arg("--max-queries")
        .arg("1")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout, "q0\tt0\t24\t0\t\nq0\tt1\t8\t-1\t\n");

    Ok(())
}
