use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

fn create_index(infile: &str, index: &Path, extra: &[&str]) -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("createindex").arg(infile).arg(index).args(extra);
    cmd.assert().success();
    Ok(())
}

fn parse_params(stdout: &str) -> (f64, f64) {
    let mut mu = f64::NAN;
    let mut lambda = f64::NAN;
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields[0] {
            "mu" => mu = fields[1].parse().unwrap(),
            "lambda" => lambda = fields[1].parse().unwrap(),
            _ => {}
        }
    }
    (mu, lambda)
}

#[test]
fn command_samplemulambda() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("pep.kmi");
    create_index("tests/kmerfold/pep.fa", &index, &["-k", "3"])?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd.arg("samplemulambda").arg(&index).output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;

    assert_eq!(stdout.lines().count(), 2);
    let (mu, lambda) = parse_params(&stdout);
    assert!(mu.is_finite());
    assert!(lambda.is_finite() && lambda > 0.0);

    Ok(())
}

#[test]
fn command_samplemulambda_parallel() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("pep.kmi");
    create_index("tests/kmerfold/pep.fa", &index, &["-k", "3"])?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let single = cmd
        .arg("samplemulambda")
        .arg(&index)
        .arg("--seed")
        .arg("7")
        .arg("-p")
        .arg("1")
        .output()?;
    let mut cmd = Command::cargo_bin("kmerfold")?;
    let multi = cmd
        .arg("samplemulambda")
        .arg(&index)
        .arg("--seed")
        .arg("7")
        .arg("-p")
        .arg("4")
        .output()?;

    assert!(single.status.success());
    assert_eq!(single.stdout, multi.stdout);

    Ok(())
}

#[test]
fn command_samplemulambda_sidecar() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("pep.kmi");
    create_index("tests/kmerfold/pep.fa", &index, &["-k", "3"])?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("samplemulambda").arg(&index).arg("--sidecar");
    cmd.assert().success();

    let sidecar = temp.path().join("pep.kmi.evd");
    assert!(sidecar.is_file());
    let content = std::fs::read_to_string(&sidecar)?;
    assert!(content.starts_with("mu\t"));

    // search picks the sidecar up
    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(&index)
        .arg("--max-seqs")
        .arg("1")
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;

    assert_eq!(stdout.lines().count(), 40);
    for line in stdout.lines() {
        let evalue = line.split('\t').nth(4).unwrap();
        assert!(!evalue.is_empty(), "{}", line);
        assert!(evalue.parse::<f64>().is_ok(), "{}", line);
    }

    Ok(())
}

#[test]
fn command_samplemulambda_fallback() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("targets.kmi");
    create_index(
        "tests/kmerfold/targets.fa",
        &index,
        &["--matrix", "tests/kmerfold/abc.mat", "-k", "2"],
    )?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd.arg("samplemulambda").arg(&index).output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout, "mu\t10\nlambda\t0.3\n");
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("fallback"));

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("samplemulambda")
        .arg(&index)
        .arg("--fallback-mu")
        .arg("5")
        .arg("--fallback-lambda")
        .arg("0.5")
        .output()?;
    let stdout = String::from_utf8(output.stdout)?;
    assert_eq!(stdout, "mu\t5\nlambda\t0.5\n");

    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("samplemulambda")
        .arg(&index)
        .arg("--fallback-lambda")
        .arg("0");
    cmd.assert().failure();

    Ok(())
}

fn search_evalues(index: &Path, extra: &[&str]) -> anyhow::Result<(Vec<String>, String)> {
    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd
        .arg("search")
        .arg(index)
        .arg("--max-seqs")
        .arg("1")
        .args(extra)
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout)?;
    let evalues = stdout
        .lines()
        .map(|line| line.split('\t').nth(4).unwrap().to_string())
        .collect();
    Ok((evalues, String::from_utf8(output.stderr)?))
}

#[test]
fn command_createindex_rebuild_drops_sidecar() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("db.kmi");
    let sidecar = temp.path().join("db.kmi.evd");

    create_index("tests/kmerfold/pep.fa", &index, &["-k", "3", "--calibrate"])?;
    assert!(sidecar.is_file());

    // same path, other collection, no calibration
    create_index(
        "tests/kmerfold/targets.fa",
        &index,
        &["--matrix", "tests/kmerfold/abc.mat", "-k", "2"],
    )?;
    assert!(!sidecar.exists());

    let (evalues, _) = search_evalues(&index, &[])?;
    assert_eq!(evalues.len(), 3);
    assert!(evalues.iter().all(|e| e.is_empty()));

    let mut cmd = Command::cargo_bin("kmerfold")?;
    let output = cmd.arg("search").arg(&index).arg("--evalue").arg("1").output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8(output.stderr)?.contains("--evalue needs"));

    Ok(())
}

#[test]
fn command_search_ignores_stale_sidecar() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("db.kmi");
    let sidecar = temp.path().join("db.kmi.evd");

    create_index("tests/kmerfold/pep.fa", &index, &["-k", "3", "--calibrate"])?;
    let content = std::fs::read_to_string(&sidecar)?;

    // a sidecar left over from another build of the index
    create_index("tests/kmerfold/pep.fa", &index, &["-k", "4"])?;
    std::fs::write(&sidecar, content)?;

    let (evalues, stderr) = search_evalues(&index, &[])?;
    assert_eq!(evalues.len(), 40);
    assert!(evalues.iter().all(|e| e.is_empty()));
    assert!(stderr.contains("Ignoring"));
    assert!(stderr.contains("fitted on index"));

    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("search").arg(&index).arg("--evalue").arg("1");
    cmd.assert().failure();

    Ok(())
}

#[test]
fn command_search_sidecar_mode_mismatch() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let index = temp.path().join("pep.kmi");
    create_index("tests/kmerfold/pep.fa", &index, &["-k", "3"])?;

    let mut cmd = Command::cargo_bin("kmerfold")?;
    cmd.arg("samplemulambda").arg(&index).arg("--sidecar");
    cmd.assert().success();

    let (evalues, stderr) = search_evalues(&index, &[])?;
    assert!(evalues.iter().all(|e| !e.is_empty()));
    assert!(!stderr.contains("Ignoring"));

    for extra in [&["--diag-band", "2"][..], &["--rescore"][..]] {
        let (evalues, stderr) = search_evalues(&index, extra)?;
        assert_eq!(evalues.len(), 40);
        assert!(evalues.iter().all(|e| e.is_empty()), "{:?}", extra);
        assert!(stderr.contains("Ignoring"), "{:?}", extra);
        assert!(stderr.contains("searching with"), "{:?}", extra);
    }

    // explicit parameters still apply
    let (evalues, stderr) = search_evalues(
        &index,
        &["--rescore", "--mu", "10", "--lambda", "0.3"],
    )?;
    assert!(evalues.iter().all(|e| !e.is_empty()));
    assert!(!stderr.contains("Ignoring"));

    Ok(())
}
