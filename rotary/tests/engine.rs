use half::{bf16, f16};
use log::LevelFilter::Trace;
use rotary::{build, Error, Layout, Rope, RotaryConfig, ScalingStrategy};
use simple_logger::SimpleLogger;
use std::sync::Once;
use tensor::{DataType, Tensor};

fn logger_init() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| SimpleLogger::new().with_level(Trace).init().unwrap());
}

#[derive(serde::Deserialize)]
struct EngineJson {
    #[serde(flatten)]
    config: RotaryConfig,
    #[serde(default)]
    rope_scaling: ScalingStrategy,
}

fn load(json: &str) -> Rope {
    let EngineJson {
        config,
        rope_scaling,
    } = serde_json::from_str(json).unwrap();
    build(config, rope_scaling).unwrap()
}

#[test]
fn identity_at_position_zero() {
    logger_init();
    let rope = load(r#"{"dim": 8, "n_heads": 1, "max_seq_len": 4, "interleaved": false}"#);
    let Rope::Rotary(rope) = rope else {
        panic!("expected an activation transformer")
    };
    assert_eq!(rope.layout(), Layout::SplitHalf);

    let expected = [1., 0.1, 0.01, 0.001];
    for (f, e) in rope.inv_freqs().iter().zip(expected) {
        assert!((f - e).abs() <= e * 1e-6);
    }

    let x = Tensor::from_slice(&[1, 1, 1, 8], &[1f32; 8]);
    let y = rope.apply(&x, Some(0), None).unwrap();
    assert_eq!(y.to_vec::<f32>().unwrap(), [1f32; 8]);
}

#[test]
fn llama3_keeps_high_frequencies() {
    logger_init();
    let rope = load(
        r#"{
            "dim": 4096,
            "n_heads": 32,
            "theta": 500000.0,
            "max_seq_len": 64,
            "rope_scaling": {
                "rope_type": "llama3",
                "params": {
                    "factor": 8.0,
                    "low_freq_factor": 1.0,
                    "high_freq_factor": 4.0,
                    "original_max_position_embeddings": 8192
                }
            }
        }"#,
    );
    let rope = rope.as_rotary().unwrap();
    let base = rotary::inv_freqs(128, 5e5);
    let high_wavelen = 8192. / 4.;
    for (&f, &s) in base.iter().zip(rope.inv_freqs()) {
        if 2. * std::f32::consts::PI / f < high_wavelen {
            assert_eq!(f, s);
        }
    }

    // flattened and base layouts hold the same values
    let flat = rope.freqs_cis_flat();
    assert_eq!(flat.shape(), &[128, 128]);
    assert_eq!(flat.physical(), rope.freqs_cis().physical());
    assert_eq!(flat.data_type(), DataType::F32);
}

#[test]
fn every_float_type_rotates() {
    logger_init();
    let rope = load(r#"{"dim": 32, "n_heads": 2, "max_seq_len": 8}"#);
    let rope = rope.as_rotary().unwrap();
    let data = (0..2 * 3 * 16).map(|i| (i as f32 * 0.37).sin()).collect::<Vec<_>>();
    let shape = [2, 3, 16];

    let reference = rope
        .apply(&Tensor::from_slice(&shape, &data), Some(4), None)
        .unwrap()
        .to_vec::<f32>()
        .unwrap();

    let wide = data.iter().map(|&x| x as f64).collect::<Vec<_>>();
    let y = rope.apply(&Tensor::from_slice(&shape, &wide), Some(4), None).unwrap();
    assert_eq!(y.data_type(), DataType::F64);
    for (a, b) in y.to_vec::<f64>().unwrap().iter().zip(&reference) {
        assert!((*a as f32 - b).abs() < 1e-5);
    }

    let narrow = data.iter().map(|&x| f16::from_f32(x)).collect::<Vec<_>>();
    let y = rope.apply(&Tensor::from_slice(&shape, &narrow), Some(4), None).unwrap();
    assert_eq!(y.data_type(), DataType::F16);
    for (a, b) in y.to_vec::<f16>().unwrap().iter().zip(&reference) {
        assert!((a.to_f32() - b).abs() < 1e-2);
    }

    let brain = data.iter().map(|&x| bf16::from_f32(x)).collect::<Vec<_>>();
    let y = rope.apply(&Tensor::from_slice(&shape, &brain), Some(4), None).unwrap();
    assert_eq!(y.data_type(), DataType::BF16);
    for (a, b) in y.to_vec::<bf16>().unwrap().iter().zip(&reference) {
        assert!((a.to_f32() - b).abs() < 5e-2);
    }
}

#[test]
fn window_beyond_table_fails() {
    logger_init();
    let rope = load(r#"{"dim": 8, "n_heads": 1, "max_seq_len": 2}"#);
    let rope = rope.as_rotary().unwrap();
    let x = Tensor::from_slice(&[1, 3, 1, 8], &[0f32; 24]);
    assert!(rope.apply(&x, Some(1), None).is_ok());
    assert!(matches!(
        rope.apply(&x, Some(2), None),
        Err(Error::OutOfRange { start: 2, len: 3, rows: 4 })
    ));
}

#[test]
fn yarn_provides_tables() {
    logger_init();
    let rope = load(
        r#"{
            "dim": 64,
            "n_heads": 1,
            "max_seq_len": 4096,
            "rope_scaling": {
                "rope_type": "yarn",
                "params": {
                    "factor": 40.0,
                    "original_max_position_embeddings": 4096,
                    "beta_fast": 32,
                    "beta_slow": 1,
                    "mscale": 1.0,
                    "mscale_all_dim": 1.0
                }
            }
        }"#,
    );
    assert!(rope.as_rotary().is_none());
    let yarn = rope.as_yarn().unwrap();
    // equal mscales cancel out
    assert_eq!(yarn.mscale().unwrap(), 1.);

    let x = Tensor::from_slice(&[1, 7, 1, 64], &[0f32; 7 * 64]);
    let stacked = yarn.freqs_for(&x).unwrap();
    assert_eq!(stacked.shape(), &[2, 7, 64]);
    let (cos, sin) = stacked.physical().split_at(7 * 64);
    for (c, s) in cos.iter().zip(sin) {
        assert!((c * c + s * s - 1.).abs() < 1e-5);
    }
}

#[test]
fn yarn_without_params_fails_at_use() {
    logger_init();
    let rope = load(
        r#"{"dim": 64, "n_heads": 1, "max_seq_len": 8, "rope_scaling": {"rope_type": "yarn", "params": null}}"#,
    );
    let yarn = rope.as_yarn().unwrap();
    let x = Tensor::from_slice(&[1, 2, 1, 64], &[0f32; 128]);
    assert!(matches!(
        yarn.freqs_for(&x),
        Err(Error::MissingScalingParams { strategy: "yarn" })
    ));
}

#[test]
fn shared_engine_across_threads() {
    logger_init();
    let rope = load(r#"{"dim": 128, "n_heads": 2, "theta": 1000000.0, "max_seq_len": 128}"#);
    let rope = rope.as_rotary().unwrap();
    let data = (0..10 * 64).map(|i| i as f32 / 640.).collect::<Vec<_>>();
    let x = &Tensor::from_slice(&[10, 1, 64], &data);

    let results = std::thread::scope(|s| {
        let handles = (0..4)
            .map(|i| s.spawn(move || rope.apply(x, Some(i * 10), None).unwrap()))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap().take_physical())
            .collect::<Vec<_>>()
    });
    for (i, result) in results.iter().enumerate() {
        let expected = rope.apply(x, Some(i as u32 * 10), None).unwrap();
        assert_eq!(result, expected.physical());
    }
}
