use std::{
    fs,
    path::PathBuf,
    process::{Command, Output},
};

use candle_core::Device;
use fnnlm_core::snapshot::Snapshot;

const TRAIN: &str = "the cat sat on the mat
the dog sat on the log
a cat saw a dog
the dog saw the cat
a dog sat on a mat
";

// Nothing here is in the training vocabulary, so every dev word is `<unk>`.
// Training only ever lowers the probability of `<unk>`, which makes every
// epoch after the first one worse on this set.
const DEV_UNSEEN: &str = "zebra quokka
quokka
";

const TRAIN_SENTENCES: usize = 5;
const EPOCHS: usize = 4;
const SAMPLES: usize = 2;

struct Workdir(PathBuf);

impl Workdir {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("fnnlm-cli-{}-{name}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("train.txt"), TRAIN).unwrap();
        fs::write(dir.join("dev.txt"), DEV_UNSEEN).unwrap();
        Self(dir)
    }

    fn path(&self, name: &str) -> String {
        self.0.join(name).to_string_lossy().into_owned()
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

fn fnnlm(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fnnlm"))
        .args(args)
        .env("RUST_LOG", "info")
        .output()
        .unwrap()
}

fn train(workdir: &Workdir) -> Output {
    let (train, dev, save) = (
        workdir.path("train.txt"),
        workdir.path("dev.txt"),
        workdir.path("best"),
    );
    let epochs = EPOCHS.to_string();
    let samples = SAMPLES.to_string();
    let output = fnnlm(&[
        "--train",
        &train,
        "--dev",
        &dev,
        "--save",
        &save,
        "--epochs",
        &epochs,
        "--samples",
        &samples,
        "--report-interval",
        "1",
        "--embedding-dims",
        "8",
        "--hidden-dims",
        "16",
        "--dropout",
        "0",
        "--lr",
        "0.05",
        "--max-len",
        "12",
        "--seed",
        "7",
    ]);
    assert!(
        output.status.success(),
        "fnnlm failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

/// Pulls the number printed right after `key`.
fn field<'a>(line: &'a str, key: &str) -> &'a str {
    let start = line.find(key).unwrap() + key.len();
    let rest = &line[start..];
    &rest[..rest.find([',', ')', ' ']).unwrap_or(rest.len())]
}

/// Iters that `--save` wrote a snapshot for, according to the log.
fn saved_iters(stderr: &str) -> Vec<usize> {
    stderr
        .lines()
        .filter_map(|line| line.split("Saving model from iter ").nth(1))
        .map(|rest| rest.split_whitespace().next().unwrap().parse().unwrap())
        .collect()
}

#[test]
fn training_reports_every_epoch_on_stdout() {
    let workdir = Workdir::new("report");
    let output = train(&workdir);
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    let lines_per_epoch = TRAIN_SENTENCES + 2 + SAMPLES;
    assert_eq!(lines.len(), EPOCHS * lines_per_epoch, "{stdout}");

    for (epoch, block) in lines.chunks(lines_per_epoch).enumerate() {
        for (i, line) in block[..TRAIN_SENTENCES].iter().enumerate() {
            let prefix = format!("--finished {} sentences (word/sec=", i + 1);
            assert!(line.starts_with(&prefix), "{line}");
            field(line, "word/sec=").parse::<f64>().unwrap();
        }

        let train_line = block[TRAIN_SENTENCES];
        let dev_line = block[TRAIN_SENTENCES + 1];
        for (line, name) in [(train_line, "train"), (dev_line, "dev")] {
            assert!(
                line.starts_with(&format!("iter {epoch}: {name} loss/word=")),
                "{line}"
            );
            let loss: f64 = field(line, "loss/word=").parse().unwrap();
            let ppl: f64 = field(line, "ppl=").parse().unwrap();
            assert!(loss.is_finite() && loss > 0.0, "{line}");
            // Both are rounded to four places before printing.
            assert!((ppl - loss.exp()).abs() <= 1e-3 * ppl.max(1.0), "{line}");
            field(line, "word/sec=").parse::<f64>().unwrap();
        }

        for sample in &block[TRAIN_SENTENCES + 2..] {
            assert!(sample.split_whitespace().count() <= 12, "{sample}");
            for word in sample.split_whitespace() {
                assert!(
                    word == "<unk>" || TRAIN.split_whitespace().any(|known| known == word),
                    "unexpected word {word:?} in sample {sample:?}"
                );
            }
        }
    }
}

#[test]
fn snapshot_is_written_only_when_dev_loss_improves() {
    let workdir = Workdir::new("best");
    let output = train(&workdir);
    let stdout = String::from_utf8(output.stdout).unwrap();
    let stderr = String::from_utf8(output.stderr).unwrap();

    let dev_losses: Vec<f64> = (0..EPOCHS)
        .map(|epoch| {
            let prefix = format!("iter {epoch}: dev loss/word=");
            let line = stdout.lines().find(|line| line.starts_with(&prefix)).unwrap();
            field(line, "loss/word=").parse().unwrap()
        })
        .collect();

    let saved = saved_iters(&stderr);
    assert_eq!(saved.first(), Some(&0), "{stderr}");
    assert!(
        saved.len() < EPOCHS,
        "every epoch was saved, dev losses were {dev_losses:?}"
    );
    for epoch in 1..EPOCHS {
        let best_before = dev_losses[..epoch].iter().copied().fold(f64::MAX, f64::min);
        if saved.contains(&epoch) {
            assert!(dev_losses[epoch] <= best_before, "{dev_losses:?} {saved:?}");
        } else {
            assert!(dev_losses[epoch] >= best_before, "{dev_losses:?} {saved:?}");
        }
    }

    let snapshot = Snapshot::load(workdir.path("best.safetensors"), &Device::Cpu).unwrap();
    let last_saved = *saved.last().unwrap();
    assert_eq!(snapshot.metadata.epoch, last_saved);
    assert_eq!(
        format!("{:.4}", snapshot.metadata.dev_loss_per_word),
        format!("{:.4}", dev_losses[last_saved])
    );

    // Evaluating the snapshot gives back the dev loss it was saved with.
    let dev = workdir.path("dev.txt");
    let load = fnnlm(&["--load", &workdir.path("best"), "--dev", &dev, "--samples", "1"]);
    assert!(load.status.success(), "{}", String::from_utf8_lossy(&load.stderr));
    let load_stdout = String::from_utf8(load.stdout).unwrap();
    let lines: Vec<&str> = load_stdout.lines().collect();
    assert_eq!(lines.len(), 2, "{load_stdout}");
    assert!(lines[0].starts_with("iter final: dev loss/word="), "{}", lines[0]);
    assert_eq!(
        field(lines[0], "loss/word=").parse::<f64>().unwrap(),
        dev_losses[last_saved]
    );
}

#[test]
fn load_refuses_training_flags() {
    let workdir = Workdir::new("conflict");
    let output = fnnlm(&["--load", &workdir.path("best"), "--lr", "0.1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot be used with"));
    assert!(output.stdout.is_empty());
}
