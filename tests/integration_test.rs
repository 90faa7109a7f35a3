//! Integration tests: constraint masks, full SMC runs on the demo and toy models,
//! cached and batched model plumbing.

use smc_oxidized::{
    create_demo_model_seeded, spawn_batcher, BigramModel, CachedModel, CancelFlag, ConstraintMasks,
    EmptyMaskPolicy, Execution, ResamplingScheme, SequenceModel, ShortWordGenerator, SmcConfig,
    SmcError, SmcOutput, Vocabulary, WordBoundary,
};
use std::sync::Arc;

fn toy_vocab() -> Vocabulary {
    Vocabulary::from_tokens(&["a", "bb", "ccccc", "\n", "<eos>"], "<eos>").unwrap()
}

fn longest_word(text: &str) -> usize {
    text.split_whitespace()
        .map(|w| w.chars().count())
        .max()
        .unwrap_or(0)
}

fn texts(out: &SmcOutput) -> Vec<String> {
    out.particles.iter().map(|p| p.text.clone()).collect()
}

#[test]
fn toy_vocabulary_masks() {
    let vocab = toy_vocab();
    let masks = ConstraintMasks::for_vocabulary(&vocab);
    let bucket0: Vec<&str> = masks
        .bucket(0)
        .iter()
        .map(|id| vocab.token(id).unwrap())
        .collect();
    assert_eq!(bucket0, vec!["a", "bb", "ccccc"]);
    assert_eq!(masks.empty_buckets(), vec![5]);
}

#[test]
fn toy_vocabulary_end_to_end() {
    let model = Arc::new(BigramModel::new(toy_vocab(), 3, 1.0));
    let config = SmcConfig {
        num_particles: 3,
        max_tokens: 5,
        seed: Some(42),
        empty_mask: EmptyMaskPolicy::Finish,
        ..SmcConfig::default()
    };
    let gen = ShortWordGenerator::new(model, config).unwrap();
    let out = gen.generate_text("a").unwrap();

    assert_eq!(out.particles.len(), 3);
    assert!(out.rounds <= 5);
    assert!(!out.cancelled);
    for p in &out.particles {
        assert!(p.finished);
        assert!(p.text.starts_with('a'));
        assert!(!p.text.contains('\n'));
        assert!(longest_word(&p.text) <= 5, "word too long in {:?}", p.text);
    }
}

#[test]
fn toy_vocabulary_aborts_on_empty_bucket() {
    let model = Arc::new(BigramModel::new(toy_vocab(), 3, 1.0));
    let config = SmcConfig {
        num_particles: 3,
        max_tokens: 5,
        seed: Some(42),
        ..SmcConfig::default()
    };
    let gen = ShortWordGenerator::new(model, config).unwrap();
    assert!(matches!(
        gen.generate_text("a"),
        Err(SmcError::EmptyMask { bucket: 5 })
    ));
}

#[test]
fn weights_normalised_every_round() {
    let model = Arc::new(create_demo_model_seeded(7).unwrap());
    let config = SmcConfig {
        num_particles: 8,
        max_tokens: 12,
        seed: Some(1),
        ess_threshold: Some(0.5),
        resampling: ResamplingScheme::Systematic,
        ..SmcConfig::default()
    };
    let gen = ShortWordGenerator::new(model, config).unwrap();
    let out = gen.generate_text("the vote").unwrap();

    assert!(!out.history.is_empty());
    for round in &out.history {
        assert!((round.weight_sum - 1.0).abs() < 1e-9, "round {}", round.round);
        assert!(round.ess > 0.0 && round.ess <= 8.0 + 1e-9);
    }
    let total: f64 = out.particles.iter().map(|p| p.weight).sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert_eq!(out.particles.len(), 8);
    assert!(out.log_evidence.is_finite());
}

#[test]
fn strict_boundary_keeps_every_word_short() {
    let model = Arc::new(create_demo_model_seeded(11).unwrap());
    let config = SmcConfig {
        num_particles: 10,
        max_tokens: 20,
        seed: Some(5),
        word_boundary: WordBoundary::Whitespace,
        empty_mask: EmptyMaskPolicy::Finish,
        ..SmcConfig::default()
    };
    let gen = ShortWordGenerator::new(model, config).unwrap();
    let out = gen.generate_text("the").unwrap();

    assert!(out.rounds <= 20);
    for p in &out.particles {
        assert!(p.finished);
        assert!(!p.text.contains('\n'));
        assert!(longest_word(&p.text) <= 5, "word too long in {:?}", p.text);
    }
}

#[test]
fn sequential_and_parallel_agree() {
    let run = |execution| {
        let model = Arc::new(create_demo_model_seeded(2).unwrap());
        let config = SmcConfig {
            num_particles: 6,
            max_tokens: 10,
            seed: Some(99),
            execution,
            empty_mask: EmptyMaskPolicy::Finish,
            ..SmcConfig::default()
        };
        ShortWordGenerator::new(model, config)
            .unwrap()
            .generate_text("news")
            .unwrap()
    };
    assert_eq!(
        texts(&run(Execution::Sequential)),
        texts(&run(Execution::Parallel))
    );
}

#[test]
fn cached_and_batched_models_match_direct() {
    let config = SmcConfig {
        num_particles: 4,
        max_tokens: 8,
        seed: Some(17),
        empty_mask: EmptyMaskPolicy::Finish,
        ..SmcConfig::default()
    };
    let prompt = "it is";

    let direct = ShortWordGenerator::new(Arc::new(create_demo_model_seeded(4).unwrap()), config.clone())
        .unwrap()
        .generate_text(prompt)
        .unwrap();

    let cached = Arc::new(CachedModel::new(create_demo_model_seeded(4).unwrap(), 4096));
    let via_cache = ShortWordGenerator::new(Arc::clone(&cached), config.clone())
        .unwrap()
        .generate_text(prompt)
        .unwrap();
    assert_eq!(texts(&direct), texts(&via_cache));
    assert!(!cached.is_empty());
    assert!(cached.hit_rate() > 0.0);

    let (client, handle) = spawn_batcher(create_demo_model_seeded(4).unwrap(), 4, 1).unwrap();
    let batched_gen = ShortWordGenerator::new(Arc::new(client), config).unwrap();
    let via_batcher = batched_gen.generate_text(prompt).unwrap();
    drop(batched_gen);
    handle.join().unwrap();
    assert_eq!(texts(&direct), texts(&via_batcher));
}

#[test]
fn cancelled_run_returns_current_population() {
    let model = Arc::new(create_demo_model_seeded(3).unwrap());
    let config = SmcConfig {
        num_particles: 5,
        seed: Some(0),
        ..SmcConfig::default()
    };
    let gen = ShortWordGenerator::new(model, config).unwrap();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let ids = create_demo_model_seeded(3)
        .unwrap()
        .vocabulary()
        .encode_greedy("the")
        .unwrap();
    let out = gen.generate_with_cancel(&ids, cancel).unwrap();
    assert!(out.cancelled);
    assert_eq!(out.rounds, 0);
    assert_eq!(out.particles.len(), 5);
    for p in &out.particles {
        assert!(!p.finished);
        assert_eq!(p.text, "the");
    }
}

#[test]
fn zero_timeout_cancels_before_first_round() {
    let model = Arc::new(create_demo_model_seeded(3).unwrap());
    let config = SmcConfig {
        num_particles: 3,
        seed: Some(0),
        timeout_ms: Some(0),
        ..SmcConfig::default()
    };
    let out = ShortWordGenerator::new(model, config)
        .unwrap()
        .generate_text("we")
        .unwrap();
    assert!(out.cancelled);
    assert!(out.history.is_empty());
}
