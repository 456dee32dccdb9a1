//! Voxel-level AUC-ROC from accumulated softmax probabilities.

use crate::{MetricError, MetricResult};

/// One-vs-rest AUC-ROC, macro-averaged over the classes present in `labels`.
///
/// `probs` is voxel-major: voxel v's class probabilities occupy
/// `probs[v * num_classes .. (v + 1) * num_classes]`, which lets callers
/// concatenate samples of different spatial shapes. `labels[v]` is the true
/// class of voxel v. The binary case (`num_classes == 2`) scores the positive
/// class only. Ranks are tie-averaged (the Mann-Whitney formulation), so
/// constant probability runs score 0.5 rather than an arbitrary extreme.
pub fn auc_roc(probs: &[f32], labels: &[i64], num_classes: usize) -> MetricResult<f32> {
    if num_classes < 2 {
        return Err(MetricError::DegenerateAuc {
            msg: format!("need at least two classes, got {num_classes}"),
        });
    }
    if labels.is_empty() {
        return Err(MetricError::DegenerateAuc {
            msg: "no voxels accumulated".to_string(),
        });
    }
    if probs.len() != labels.len() * num_classes {
        return Err(MetricError::Shape {
            msg: format!(
                "{} probabilities do not cover {} voxels x {} classes",
                probs.len(),
                labels.len(),
                num_classes
            ),
        });
    }

    let classes: Vec<usize> = if num_classes == 2 {
        vec![1]
    } else {
        (0..num_classes).collect()
    };

    let mut total = 0.0f64;
    let mut scored = 0usize;
    for c in &classes {
        if let Some(auc) = one_vs_rest(probs, labels, num_classes, *c) {
            total += auc;
            scored += 1;
        }
    }
    if scored == 0 {
        return Err(MetricError::DegenerateAuc {
            msg: "labels hold a single class; positives and negatives are both required"
                .to_string(),
        });
    }
    Ok((total / scored as f64) as f32)
}

/// AUC for one class, or `None` when positives or negatives are absent.
fn one_vs_rest(probs: &[f32], labels: &[i64], num_classes: usize, class: usize) -> Option<f64> {
    let n = labels.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        let pa = probs[a * num_classes + class];
        let pb = probs[b * num_classes + class];
        pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
    });

    // Walk score-sorted voxels, averaging ranks across ties.
    let mut pos_rank_sum = 0.0f64;
    let mut n_pos = 0usize;
    let mut i = 0usize;
    while i < n {
        let mut j = i;
        let score = probs[order[i] * num_classes + class];
        while j < n && probs[order[j] * num_classes + class] == score {
            j += 1;
        }
        // 1-based ranks i+1 ..= j share the average.
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            if labels[idx] == class as i64 {
                pos_rank_sum += avg_rank;
                n_pos += 1;
            }
        }
        i = j;
    }

    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos as f64 * n_neg as f64))
}
