mod args;
mod device;

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use args::Args;
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use fnnlm_core::{
    corpus::{Sentence, read_dataset},
    feed_forward_language_model::FeedForwardLanguageModel,
    language_model::SentenceGenerator,
    snapshot::{Snapshot, SnapshotMetadata, save_snapshot, snapshot_path},
    trainer::{DevTracker, EpochStats, Trainer, TrainingOptimizer, evaluate},
    util::count_params,
    vocabulary::Vocabulary,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::info;
use rand::{SeedableRng, rngs::StdRng};

/// This is the feed-forward language model from Bengio et al.,
/// "A Neural Probabilistic Language Model" (2003):
///
///     https://www.jmlr.org/papers/v3/bengio03a.html
fn main() -> Result<()> {
    let multi_progress = MultiProgress::new();
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let level = logger.filter();
    LogWrapper::new(multi_progress.clone(), logger).try_init()?;
    log::set_max_level(level);
    let args = Args::parse();
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let seed = args.seed.unwrap_or(timestamp);
    let mut rng = StdRng::seed_from_u64(seed);
    let device = args.device.to_candle_device()?;
    info!("Using {} for training/inference (seed {seed}).", args.device);

    if let Some(load) = &args.load {
        let path = snapshot_path(load);
        info!("Loading model from {}.", path.display());
        let mut snapshot = Snapshot::load(&path, &device)?;
        info!(
            "Snapshot was taken after iter {} with dev loss/word={:.4}.",
            snapshot.metadata.epoch, snapshot.metadata.dev_loss_per_word
        );
        let dev = read_dataset(&args.dev, &mut snapshot.vocabulary)?;
        let options = snapshot.metadata.options;
        let model_no_grad = options.build_no_grad(&snapshot.varmap, &device)?;
        let dev_stats = evaluate_with_progress(&multi_progress, &model_no_grad, &dev, &device)?;
        print_epoch_stats("final", "dev", &dev_stats);
        print_samples(&args, &model_no_grad, &snapshot.vocabulary, &mut rng, &device)?;
        return Ok(());
    }

    let mut vocabulary = Vocabulary::new();
    let train = read_dataset(&args.train, &mut vocabulary)?;
    vocabulary.freeze();
    let dev = read_dataset(&args.dev, &mut vocabulary)?;
    info!("Initialized vocabulary with {} words.", vocabulary.len());

    let options = args.model_options(vocabulary.len());
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = options.build(vb)?;
    info!("Parameters in model: {}", count_params(&varmap));

    if args.vars {
        print_vars(&varmap)?;
    }

    let mut optimizer = TrainingOptimizer::new(args.optimizer.into(), varmap.all_vars(), args.lr)?;
    let mut trainer = Trainer::new(train, dev);
    let mut dev_tracker = DevTracker::new();
    let save_path = (!args.no_save).then(|| snapshot_path(&args.save));

    for epoch in 0..args.epochs {
        let bar = progress_bar(&multi_progress, trainer.train_len(), "Training")?;
        let train_stats =
            trainer.train_epoch(&model, &mut optimizer, &mut rng, &device, |done, stats| {
                bar.inc(1);
                if args.report_interval > 0 && done % args.report_interval == 0 {
                    multi_progress.suspend(|| {
                        println!(
                            "--finished {done} sentences (word/sec={:.2})",
                            stats.words_per_sec()
                        )
                    });
                }
            })?;
        bar.finish_and_clear();
        print_epoch_stats(&epoch.to_string(), "train", &train_stats);

        let model_no_grad = options.build_no_grad(&varmap, &device)?;
        let bar = progress_bar(&multi_progress, trainer.dev_len(), "Evaluating")?;
        let dev_stats = trainer.evaluate(&model_no_grad, &device, |_, _| bar.inc(1))?;
        bar.finish_and_clear();

        let observation = dev_tracker.observe(dev_stats.loss);
        if observation.decay_lr {
            let lr = optimizer.decay_learning_rate();
            info!("Dev loss got worse, learning rate is now {lr}.");
        }
        if observation.is_best {
            if let Some(path) = &save_path {
                info!("Saving model from iter {epoch} to {}.", path.display());
                save_snapshot(
                    path,
                    &varmap,
                    &SnapshotMetadata {
                        words: vocabulary.words().to_vec(),
                        options,
                        epoch,
                        dev_loss_per_word: dev_stats.loss_per_word(),
                    },
                )?;
            }
        }
        print_epoch_stats(&epoch.to_string(), "dev", &dev_stats);

        print_samples(&args, &model_no_grad, &vocabulary, &mut rng, &device)?;
    }

    Ok(())
}

fn print_epoch_stats(iter: &str, name: &str, stats: &EpochStats) {
    println!(
        "iter {iter}: {name} loss/word={:.4}, ppl={:.4} (word/sec={:.2})",
        stats.loss_per_word(),
        stats.perplexity(),
        stats.words_per_sec()
    );
}

fn print_samples(
    args: &Args,
    model: &FeedForwardLanguageModel,
    vocabulary: &Vocabulary,
    rng: &mut StdRng,
    device: &candle_core::Device,
) -> Result<()> {
    let generator = SentenceGenerator::new(model, args.max_len);
    for _ in 0..args.samples {
        let sentence = generator.generate(rng, args.temperature, device)?;
        println!("{}", vocabulary.decode(&sentence)?);
    }
    Ok(())
}

fn print_vars(varmap: &VarMap) -> Result<()> {
    let mut vars: Vec<(String, candle_core::Shape)> = varmap
        .data()
        .lock()
        .map_err(|err| anyhow::anyhow!("unable to read model parameters: {err}"))?
        .iter()
        .map(|(name, var)| (name.clone(), var.shape().clone()))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, shape) in vars {
        println!("{name}: {shape:?}");
    }
    Ok(())
}

fn progress_bar(
    multi_progress: &MultiProgress,
    len: usize,
    message: &'static str,
) -> Result<ProgressBar> {
    let bar = multi_progress.add(ProgressBar::new(len as u64));
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
        )?
        .progress_chars("##-"),
    );
    bar.set_message(message);
    Ok(bar)
}

fn evaluate_with_progress(
    multi_progress: &MultiProgress,
    model: &FeedForwardLanguageModel,
    sentences: &[Sentence],
    device: &candle_core::Device,
) -> Result<EpochStats> {
    let bar = progress_bar(multi_progress, sentences.len(), "Evaluating")?;
    let stats = evaluate(model, sentences, device, |_, _| bar.inc(1))?;
    bar.finish_and_clear();
    Ok(stats)
}
