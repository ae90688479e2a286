use super::*;
use crate::core::{AttentionError, ContextWindow};
use candle_core::{DType, Device, Tensor};

fn idx(b: usize, q: usize, k: usize, q_len: usize, k_len: usize) -> usize {
    (b * q_len + q) * k_len + k
}

#[test]
fn padding_mask_from_lengths_masks_tail() -> Result<(), AttentionError> {
    let device = Device::Cpu;
    let mask = padding_mask_from_lengths(&device, &[2, 5, 7], 5)?;
    assert_eq!(mask.dims(), &[3, 5]);
    assert_eq!(mask.dtype(), MASK_DTYPE);

    let rows = mask.to_vec2::<u8>()?;
    assert_eq!(rows[0], vec![0, 0, 1, 1, 1]);
    // Lengths beyond max_len clamp, leaving nothing padded.
    assert_eq!(rows[1], vec![0; 5]);
    assert_eq!(rows[2], vec![0; 5]);
    Ok(())
}

#[test]
fn padding_mask_from_booleans_respects_flags() -> Result<(), AttentionError> {
    let device = Device::Cpu;
    let padding = vec![vec![false, true, false], vec![true, true, false]];
    let mask = padding_mask_from_booleans(&device, &padding)?;
    assert_eq!(mask.to_vec2::<u8>()?, vec![vec![0, 1, 0], vec![1, 1, 0]]);

    let ragged = vec![vec![false], vec![true, false]];
    assert!(matches!(
        padding_mask_from_booleans(&device, &ragged),
        Err(AttentionError::InvalidShape { .. })
    ));
    Ok(())
}

#[test]
fn additive_bias_maps_flags_to_negative_infinity() -> Result<(), AttentionError> {
    let device = Device::Cpu;
    let mask = Tensor::from_vec(vec![0u8, 1, 1, 0], (2, 2), &device)?;
    for dtype in [DType::F32, DType::F16, DType::BF16] {
        let bias = additive_bias(&mask, dtype)?;
        assert_eq!(bias.dtype(), dtype);
        let values = bias.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(values, vec![0.0, f32::NEG_INFINITY, f32::NEG_INFINITY, 0.0]);
    }

    let float = Tensor::from_vec(vec![0f32, -3.0], 2, &device)?;
    assert_eq!(additive_bias(&float, DType::F32)?.to_vec1::<f32>()?, vec![0.0, -3.0]);

    let ints = Tensor::from_vec(vec![0u32, 1], 2, &device)?;
    assert!(matches!(
        additive_bias(&ints, DType::F32),
        Err(AttentionError::UnsupportedDType { .. })
    ));
    Ok(())
}

#[test]
fn expand_attention_bias_accepts_broadcastable_layouts() -> Result<(), AttentionError> {
    let device = Device::Cpu;
    let key_padding = padding_mask_from_lengths(&device, &[2, 3], 3)?;
    let bias = expand_attention_bias(&key_padding, 2, 4, 3, DType::F32)?;
    assert_eq!(bias.dims(), &[2, 1, 1, 3]);

    let scores = Tensor::zeros((2, 1, 3, 3), MASK_DTYPE, &device)?;
    assert_eq!(
        expand_attention_bias(&scores, 2, 3, 3, DType::F32)?.dims(),
        &[2, 1, 3, 3]
    );

    let per_head = Tensor::zeros((1, 4, 3, 3), MASK_DTYPE, &device)?;
    assert_eq!(
        expand_attention_bias(&per_head, 2, 3, 3, DType::F32)?.dims(),
        &[1, 4, 3, 3]
    );

    let wrong_keys = Tensor::zeros((2, 3, 4), MASK_DTYPE, &device)?;
    assert!(expand_attention_bias(&wrong_keys, 2, 3, 3, DType::F32).is_err());
    let rank_one = Tensor::zeros(3, MASK_DTYPE, &device)?;
    assert!(expand_attention_bias(&rank_one, 1, 3, 3, DType::F32).is_err());
    Ok(())
}

#[test]
fn window_mask_respects_context_sides() -> Result<(), AttentionError> {
    let device = Device::Cpu;
    let window = ContextWindow::new(1, 2)?;
    let (q_len, k_len) = (4, 4);
    let mask = window_mask(&device, 2, q_len, k_len, &window)?;
    assert_eq!(mask.dims(), &[2, q_len, k_len]);
    let values = mask.flatten_all()?.to_vec1::<u8>()?;

    // Query 0 sees keys 0..=2.
    assert_eq!(values[idx(0, 0, 2, q_len, k_len)], 0);
    assert_eq!(values[idx(0, 0, 3, q_len, k_len)], 1);
    // Query 3 sees key 2 on the left but not key 1.
    assert_eq!(values[idx(1, 3, 2, q_len, k_len)], 0);
    assert_eq!(values[idx(1, 3, 1, q_len, k_len)], 1);
    Ok(())
}

#[test]
fn window_mask_sticks_queries_to_the_key_tail() -> Result<(), AttentionError> {
    let device = Device::Cpu;
    let window = ContextWindow::symmetric(1)?;
    let (q_len, k_len) = (2, 5);
    let values = window_mask(&device, 1, q_len, k_len, &window)?
        .flatten_all()?
        .to_vec1::<u8>()?;

    // Query 0 is aligned with key 3, query 1 with key 4.
    let visible: Vec<usize> = (0..k_len)
        .filter(|&k| values[idx(0, 0, k, q_len, k_len)] == 0)
        .collect();
    assert_eq!(visible, vec![2, 3, 4]);
    let visible: Vec<usize> = (0..k_len)
        .filter(|&k| values[idx(0, 1, k, q_len, k_len)] == 0)
        .collect();
    assert_eq!(visible, vec![3, 4]);
    Ok(())
}
