use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use std::collections::HashSet;
use summa_engine::{beam_search, EncoderDecoderModel, GenerationParams, Seq2SeqConfig, Seq2SeqModel};

const START: u32 = 1;
const EOS: u32 = 2;

/// Log-probabilities that always prefer token 3, then 4, with EOS unlikely.
fn sticky_distribution(prefixes: &[Vec<u32>]) -> candle_core::Result<Vec<Vec<f32>>> {
    Ok(prefixes
        .iter()
        .map(|_| vec![-20.0, -20.0, -10.0, -0.1, -1.0])
        .collect())
}

#[test]
fn test_stops_at_eos() -> anyhow::Result<()> {
    let params = GenerationParams::new(3, START, EOS, 20);
    // Emit token 3 once, then EOS becomes overwhelmingly likely.
    let out = beam_search(&params, |prefixes| {
        Ok(prefixes
            .iter()
            .map(|p| {
                if p.len() >= 2 {
                    vec![-20.0, -20.0, -0.01, -9.0, -9.0]
                } else {
                    vec![-20.0, -20.0, -9.0, -0.01, -9.0]
                }
            })
            .collect())
    })?;
    assert_eq!(out, vec![START, 3, EOS]);
    Ok(())
}

#[test]
fn test_respects_max_length() -> anyhow::Result<()> {
    let params = GenerationParams::new(2, START, EOS, 6);
    let out = beam_search(&params, sticky_distribution)?;
    assert_eq!(out.len(), 6);
    assert_eq!(out[0], START);
    assert!(out[1..].iter().all(|&t| t == 3));
    Ok(())
}

#[test]
fn test_no_repeat_ngram_blocks_repeated_bigrams() -> anyhow::Result<()> {
    let params = GenerationParams::new(2, START, EOS, 8).with_no_repeat_ngram_size(2);
    let out = beam_search(&params, sticky_distribution)?;

    let mut seen = HashSet::new();
    for pair in out.windows(2) {
        assert!(seen.insert((pair[0], pair[1])), "bigram {:?} repeated in {:?}", pair, out);
    }
    Ok(())
}

#[test]
fn test_model_generate_shapes() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = EncoderDecoderModel::load(Seq2SeqConfig::new(12, 8, 1, 2, 10), vb)?;

    let source = Tensor::new(&[[5u32, 6, 7], [8, 9, 0]], &device)?;
    let mask = Tensor::new(&[[1u32, 1, 1], [1, 1, 0]], &device)?;

    for use_cache in [true, false] {
        let params = GenerationParams::new(3, START, EOS, 10)
            .with_no_repeat_ngram_size(3)
            .with_cache(use_cache);
        let generated = model.generate(&source, &mask, &params)?;
        assert_eq!(generated.len(), 2);
        for row in &generated {
            assert_eq!(row[0], START);
            assert!(row.len() <= 10);
            assert!(row.iter().all(|&t| t < 12));
        }
    }
    Ok(())
}
