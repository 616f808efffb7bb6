//! Turning per-example features into batched tensors.
//!
//! A dataset yields [`Features`]: a map from field name to an int, a float or
//! a sequence of either. A [`DataCollator`] turns a `Vec<Features>` into a
//! [`Batch`] of `[batch, ...]` tensors ready for the first pipeline stage.
//!
//! - [`DefaultDataCollator`] stacks fields that already agree in length.
//! - [`DataCollatorWithPadding`] right-pads token fields to a common length.
//! - [`DataCollatorForTokenClassification`] also pads per-token labels.
//! - [`DataCollatorForLanguageModeling`] derives causal-LM labels from the ids.
//!
//! A `label` or `label_ids` field always comes out as `labels`.

use crate::error::{Error, Result};
use crate::tensor::{DynTensor, Tensor};
use std::collections::BTreeMap;

/// Label value that loss functions skip.
pub const IGNORE_INDEX: i64 = -100;

/// One field of one example.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Int(i64),
    Float(f32),
    IntSeq(Vec<i64>),
    FloatSeq(Vec<f32>),
    /// An absent value, e.g. an unlabelled example.
    None,
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Int(v)
    }
}

impl From<f32> for FeatureValue {
    fn from(v: f32) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<Vec<i64>> for FeatureValue {
    fn from(v: Vec<i64>) -> Self {
        FeatureValue::IntSeq(v)
    }
}

impl From<Vec<f32>> for FeatureValue {
    fn from(v: Vec<f32>) -> Self {
        FeatureValue::FloatSeq(v)
    }
}

pub type Features = BTreeMap<String, FeatureValue>;

/// Batched tensors keyed by field name.
pub type Batch = BTreeMap<String, DynTensor>;

/// Builds a batch from a list of examples.
pub trait DataCollator: Send + Sync {
    fn collate(&self, features: Vec<Features>) -> Result<Batch>;
}

/// How padding collators pick the padded length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// The longest sequence in the batch.
    #[default]
    Longest,
    /// A fixed length. Longer sequences are an error.
    MaxLength(usize),
    /// No padding; sequences must already agree in length.
    DoNotPad,
}

fn column<'a>(features: &'a [Features], key: &str) -> Vec<&'a FeatureValue> {
    features
        .iter()
        .map(|f| f.get(key).unwrap_or(&FeatureValue::None))
        .collect()
}

fn stack_scalars<T, F>(key: &str, values: &[&FeatureValue], get: F) -> Result<Tensor<T>>
where
    T: crate::tensor::TensorElem,
    F: Fn(&FeatureValue) -> Option<T>,
{
    let data = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            get(*v).ok_or_else(|| {
                Error::config(format!("field '{key}' of example {i} does not match example 0"))
            })
        })
        .collect::<Result<Vec<T>>>()?;
    Ok(Tensor::new(data, &[values.len()])?)
}

fn stack_sequences<T, F>(key: &str, values: &[&FeatureValue], get: F) -> Result<Tensor<T>>
where
    T: crate::tensor::TensorElem,
    F: Fn(&FeatureValue) -> Option<&[T]>,
{
    let mut len = None;
    let mut data = Vec::new();
    for (i, v) in values.iter().enumerate() {
        let seq = get(*v).ok_or_else(|| {
            Error::config(format!("field '{key}' of example {i} does not match example 0"))
        })?;
        match len {
            None => len = Some(seq.len()),
            Some(l) if l != seq.len() => {
                return Err(Error::config(format!(
                    "field '{key}' has sequences of length {l} and {}; use a padding collator",
                    seq.len()
                )))
            }
            Some(_) => {}
        }
        data.extend_from_slice(seq);
    }
    Ok(Tensor::new(data, &[values.len(), len.unwrap_or(0)])?)
}

/// Stacks one field across the batch: scalars become `[batch]`, sequences
/// `[batch, len]`. Integers become `I64`, floats `F32`. Example 0 decides
/// the kind; every other example must agree.
fn stack(key: &str, values: &[&FeatureValue]) -> Result<DynTensor> {
    let tensor = match values.first() {
        Some(FeatureValue::Int(_)) => DynTensor::I64(stack_scalars(key, values, |v| match v {
            FeatureValue::Int(x) => Some(*x),
            _ => None,
        })?),
        Some(FeatureValue::Float(_)) => DynTensor::F32(stack_scalars(key, values, |v| match v {
            FeatureValue::Float(x) => Some(*x),
            _ => None,
        })?),
        Some(FeatureValue::IntSeq(_)) => DynTensor::I64(stack_sequences(key, values, |v| match v {
            FeatureValue::IntSeq(x) => Some(x.as_slice()),
            _ => None,
        })?),
        Some(FeatureValue::FloatSeq(_)) => {
            DynTensor::F32(stack_sequences(key, values, |v| match v {
                FeatureValue::FloatSeq(x) => Some(x.as_slice()),
                _ => None,
            })?)
        }
        Some(FeatureValue::None) | None => {
            return Err(Error::config(format!("field '{key}' has no value to collate")))
        }
    };
    Ok(tensor)
}

fn is_present(features: &Features, key: &str) -> bool {
    !matches!(features.get(key), None | Some(FeatureValue::None))
}

/// Stacks every field of equal-length examples into a batch.
///
/// A `label` field (or, failing that, `label_ids`) is emitted as `labels`;
/// when example 0 has no value for it, no `labels` entry is produced. Other
/// fields whose value in example 0 is absent are dropped.
pub fn default_data_collator(features: Vec<Features>) -> Result<Batch> {
    let first = features
        .first()
        .ok_or_else(|| Error::config("cannot collate an empty batch"))?;

    let mut batch = Batch::new();
    if let Some(label_key) = ["label", "label_ids"].into_iter().find(|k| is_present(first, k)) {
        batch.insert("labels".to_string(), stack(label_key, &column(&features, label_key))?);
    }
    for key in first.keys() {
        if key == "label" || key == "label_ids" || !is_present(first, key) {
            continue;
        }
        batch.insert(key.clone(), stack(key, &column(&features, key))?);
    }
    Ok(batch)
}

/// [`default_data_collator`] as a [`DataCollator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDataCollator;

impl DataCollator for DefaultDataCollator {
    fn collate(&self, features: Vec<Features>) -> Result<Batch> {
        default_data_collator(features)
    }
}

/// Token fields extended by padding, with their pad value. `None` stands for
/// the collator's pad token id.
const PADDED_FIELDS: [(&str, Option<i64>); 4] = [
    ("input_ids", None),
    ("attention_mask", Some(0)),
    ("token_type_ids", Some(0)),
    ("special_tokens_mask", Some(1)),
];

/// Right-pads the token fields of every example in place and returns the
/// common sequence length.
fn pad_features(
    features: &mut [Features],
    padding: Padding,
    pad_to_multiple_of: Option<usize>,
    pad_token_id: Option<i64>,
) -> Result<usize> {
    let mut lengths = Vec::with_capacity(features.len());
    for f in features.iter() {
        match f.get("input_ids") {
            Some(FeatureValue::IntSeq(ids)) => lengths.push(ids.len()),
            _ => {
                return Err(Error::config(
                    "padding requires an integer sequence 'input_ids' in every example",
                ))
            }
        }
    }
    let longest = lengths.iter().copied().max().unwrap_or(0);

    let mut target = match padding {
        Padding::DoNotPad => return Ok(longest),
        Padding::Longest => longest,
        Padding::MaxLength(max_length) => {
            if longest > max_length {
                return Err(Error::config(format!(
                    "sequence of length {longest} exceeds max_length {max_length}"
                )));
            }
            max_length
        }
    };
    if let Some(multiple) = pad_to_multiple_of.filter(|&m| m > 0) {
        target = target.div_ceil(multiple) * multiple;
    }

    if lengths.iter().any(|&l| l < target) && pad_token_id.is_none() {
        return Err(Error::config(
            "padding is required but no pad token id is configured",
        ));
    }

    for f in features.iter_mut() {
        for (field, value) in PADDED_FIELDS {
            let Some(pad) = value.or(pad_token_id) else {
                continue;
            };
            if let Some(FeatureValue::IntSeq(seq)) = f.get_mut(field) {
                if seq.len() < target {
                    seq.resize(target, pad);
                }
            }
        }
    }
    Ok(target)
}

/// Pads `input_ids` (and `attention_mask`, `token_type_ids`,
/// `special_tokens_mask` when present) on the right, then stacks.
#[derive(Debug, Clone)]
pub struct DataCollatorWithPadding {
    pub pad_token_id: i64,
    pub padding: Padding,
    pub pad_to_multiple_of: Option<usize>,
}

impl DataCollatorWithPadding {
    pub fn new(pad_token_id: i64) -> Self {
        Self {
            pad_token_id,
            padding: Padding::Longest,
            pad_to_multiple_of: None,
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_pad_to_multiple_of(mut self, multiple: usize) -> Self {
        self.pad_to_multiple_of = Some(multiple);
        self
    }
}

impl DataCollator for DataCollatorWithPadding {
    fn collate(&self, mut features: Vec<Features>) -> Result<Batch> {
        pad_features(
            &mut features,
            self.padding,
            self.pad_to_multiple_of,
            Some(self.pad_token_id),
        )?;
        default_data_collator(features)
    }
}

/// Padding for token-level tasks: per-token `labels` are padded alongside
/// the ids with `label_pad_token_id`, so padded positions are ignored by the loss.
#[derive(Debug, Clone)]
pub struct DataCollatorForTokenClassification {
    pub pad_token_id: i64,
    pub padding: Padding,
    pub pad_to_multiple_of: Option<usize>,
    pub label_pad_token_id: i64,
}

impl DataCollatorForTokenClassification {
    pub fn new(pad_token_id: i64) -> Self {
        Self {
            pad_token_id,
            padding: Padding::Longest,
            pad_to_multiple_of: None,
            label_pad_token_id: IGNORE_INDEX,
        }
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_pad_to_multiple_of(mut self, multiple: usize) -> Self {
        self.pad_to_multiple_of = Some(multiple);
        self
    }

    pub fn with_label_pad_token_id(mut self, label_pad_token_id: i64) -> Self {
        self.label_pad_token_id = label_pad_token_id;
        self
    }
}

impl DataCollator for DataCollatorForTokenClassification {
    fn collate(&self, mut features: Vec<Features>) -> Result<Batch> {
        let label_key = match features.first() {
            Some(first) if first.contains_key("label") => "label",
            _ => "labels",
        };
        let labels: Option<Vec<FeatureValue>> = features
            .first()
            .is_some_and(|f| is_present(f, label_key))
            .then(|| {
                features
                    .iter_mut()
                    .map(|f| f.remove(label_key).unwrap_or(FeatureValue::None))
                    .collect()
            });

        let seq_len = pad_features(
            &mut features,
            self.padding,
            self.pad_to_multiple_of,
            Some(self.pad_token_id),
        )?;
        let mut batch = default_data_collator(features)?;

        if let Some(labels) = labels {
            let mut data = Vec::with_capacity(labels.len() * seq_len);
            for (i, label) in labels.into_iter().enumerate() {
                let FeatureValue::IntSeq(mut seq) = label else {
                    return Err(Error::config(format!(
                        "labels of example {i} must be an integer sequence"
                    )));
                };
                if seq.len() > seq_len {
                    return Err(Error::config(format!(
                        "labels of example {i} are longer than its input_ids"
                    )));
                }
                seq.resize(seq_len, self.label_pad_token_id);
                data.extend(seq);
            }
            let rows = data.len() / seq_len.max(1);
            batch.insert(
                "labels".to_string(),
                DynTensor::I64(Tensor::new(data, &[rows, seq_len])?),
            );
        }
        Ok(batch)
    }
}

/// Causal language modelling: `labels` are the padded `input_ids` with every
/// pad-token position replaced by [`IGNORE_INDEX`].
#[derive(Debug, Clone)]
pub struct DataCollatorForLanguageModeling {
    /// Without a pad token only equal-length batches can be collated.
    pub pad_token_id: Option<i64>,
    pub pad_to_multiple_of: Option<usize>,
}

impl DataCollatorForLanguageModeling {
    pub fn new(pad_token_id: Option<i64>) -> Self {
        Self {
            pad_token_id,
            pad_to_multiple_of: None,
        }
    }
}

impl DataCollator for DataCollatorForLanguageModeling {
    fn collate(&self, mut features: Vec<Features>) -> Result<Batch> {
        for f in features.iter_mut() {
            f.remove("label");
            f.remove("label_ids");
            f.remove("labels");
        }
        pad_features(
            &mut features,
            Padding::Longest,
            self.pad_to_multiple_of,
            self.pad_token_id,
        )?;
        let mut batch = default_data_collator(features)?;

        let input_ids = batch
            .get("input_ids")
            .ok_or_else(|| Error::config("language modelling requires 'input_ids'"))?
            .as_i64()?;
        let labels = match self.pad_token_id {
            Some(pad) => input_ids.map(|id| if id == pad { IGNORE_INDEX } else { id }),
            None => input_ids.clone(),
        };
        batch.insert("labels".to_string(), DynTensor::I64(labels));
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(pairs: &[(&str, FeatureValue)]) -> Features {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ids(batch: &Batch, key: &str) -> Vec<i64> {
        batch[key].as_i64().unwrap().data().to_vec()
    }

    #[test]
    fn test_default_with_int_labels() {
        let features: Vec<Features> = (0..8)
            .map(|i| {
                example(&[
                    ("label", FeatureValue::Int(i)),
                    ("inputs", vec![0i64, 1, 2, 3, 4, 5].into()),
                ])
            })
            .collect();
        let batch = default_data_collator(features).unwrap();
        assert_eq!(ids(&batch, "labels"), (0..8).collect::<Vec<i64>>());
        assert_eq!(batch["inputs"].shape(), &[8, 6]);
        assert!(!batch.contains_key("label"));
    }

    #[test]
    fn test_default_with_label_ids() {
        let features: Vec<Features> = (0..8)
            .map(|_| {
                example(&[
                    ("label_ids", vec![0i64, 1, 2].into()),
                    ("inputs", vec![0i64, 1, 2, 3, 4, 5].into()),
                ])
            })
            .collect();
        let batch = default_data_collator(features).unwrap();
        assert_eq!(batch["labels"].shape(), &[8, 3]);
        assert_eq!(&ids(&batch, "labels")[..3], &[0, 1, 2]);
    }

    #[test]
    fn test_default_float_labels_are_f32() {
        let features: Vec<Features> = (0..4)
            .map(|i| {
                example(&[
                    ("input_ids", vec![0i64, 1, 2, 3, 4].into()),
                    ("label", FeatureValue::Float(i as f32)),
                ])
            })
            .collect();
        let batch = default_data_collator(features).unwrap();
        assert_eq!(batch["labels"].dtype(), crate::tensor::DType::F32);
    }

    #[test]
    fn test_default_without_labels() {
        for key in ["label", "label_ids"] {
            let features: Vec<Features> = (0..8)
                .map(|_| {
                    example(&[
                        (key, FeatureValue::None),
                        ("inputs", vec![0i64, 1, 2, 3, 4, 5].into()),
                    ])
                })
                .collect();
            let batch = default_data_collator(features).unwrap();
            assert!(!batch.contains_key("labels"));
            assert_eq!(batch["inputs"].shape(), &[8, 6]);
        }
    }

    #[test]
    fn test_default_rejects_ragged_and_empty() {
        let features = vec![
            example(&[("input_ids", vec![0i64, 1].into())]),
            example(&[("input_ids", vec![0i64].into())]),
        ];
        assert!(default_data_collator(features).is_err());
        assert!(default_data_collator(Vec::new()).is_err());
    }

    fn ragged_features() -> Vec<Features> {
        vec![
            example(&[("input_ids", vec![0i64, 1, 2].into())]),
            example(&[("input_ids", vec![0i64, 1, 2, 3, 4, 5].into())]),
        ]
    }

    #[test]
    fn test_padding_longest_max_length_and_multiple() {
        let collator = DataCollatorWithPadding::new(3);
        let batch = collator.collate(ragged_features()).unwrap();
        assert_eq!(batch["input_ids"].shape(), &[2, 6]);
        assert_eq!(&ids(&batch, "input_ids")[..6], &[0, 1, 2, 3, 3, 3]);

        let collator = DataCollatorWithPadding::new(3).with_padding(Padding::MaxLength(10));
        let batch = collator.collate(ragged_features()).unwrap();
        assert_eq!(batch["input_ids"].shape(), &[2, 10]);

        let collator = DataCollatorWithPadding::new(3).with_pad_to_multiple_of(8);
        let batch = collator.collate(ragged_features()).unwrap();
        assert_eq!(batch["input_ids"].shape(), &[2, 8]);
    }

    #[test]
    fn test_padding_extends_attention_mask_with_zeros() {
        let features = vec![
            example(&[
                ("input_ids", vec![5i64].into()),
                ("attention_mask", vec![1i64].into()),
            ]),
            example(&[
                ("input_ids", vec![5i64, 6].into()),
                ("attention_mask", vec![1i64, 1].into()),
            ]),
        ];
        let batch = DataCollatorWithPadding::new(0).collate(features).unwrap();
        assert_eq!(ids(&batch, "attention_mask"), vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_max_length_shorter_than_input_is_an_error() {
        let collator = DataCollatorWithPadding::new(3).with_padding(Padding::MaxLength(4));
        assert!(collator.collate(ragged_features()).is_err());
    }

    fn token_classification_features() -> Vec<Features> {
        vec![
            example(&[
                ("input_ids", vec![0i64, 1, 2].into()),
                ("labels", vec![0i64, 1, 2].into()),
            ]),
            example(&[
                ("input_ids", vec![0i64, 1, 2, 3, 4, 5].into()),
                ("labels", vec![0i64, 1, 2, 3, 4, 5].into()),
            ]),
        ]
    }

    #[test]
    fn test_token_classification_pads_labels() {
        let batch = DataCollatorForTokenClassification::new(3)
            .collate(token_classification_features())
            .unwrap();
        assert_eq!(batch["input_ids"].shape(), &[2, 6]);
        assert_eq!(&ids(&batch, "input_ids")[..6], &[0, 1, 2, 3, 3, 3]);
        assert_eq!(batch["labels"].shape(), &[2, 6]);
        assert_eq!(&ids(&batch, "labels")[..6], &[0, 1, 2, -100, -100, -100]);

        let batch = DataCollatorForTokenClassification::new(3)
            .with_padding(Padding::MaxLength(10))
            .collate(token_classification_features())
            .unwrap();
        assert_eq!(batch["labels"].shape(), &[2, 10]);

        let batch = DataCollatorForTokenClassification::new(3)
            .with_pad_to_multiple_of(8)
            .collate(token_classification_features())
            .unwrap();
        assert_eq!(batch["input_ids"].shape(), &[2, 8]);
        assert_eq!(batch["labels"].shape(), &[2, 8]);

        let batch = DataCollatorForTokenClassification::new(3)
            .with_label_pad_token_id(-1)
            .collate(token_classification_features())
            .unwrap();
        assert_eq!(&ids(&batch, "labels")[..6], &[0, 1, 2, -1, -1, -1]);
    }

    #[test]
    fn test_language_modeling_masks_padding() {
        let collator = DataCollatorForLanguageModeling::new(Some(0));
        let features = vec![
            example(&[("input_ids", vec![4i64, 5].into())]),
            example(&[("input_ids", vec![4i64, 5, 6, 7].into())]),
        ];
        let batch = collator.collate(features).unwrap();
        assert_eq!(ids(&batch, "input_ids"), vec![4, 5, 0, 0, 4, 5, 6, 7]);
        assert_eq!(ids(&batch, "labels"), vec![4, 5, -100, -100, 4, 5, 6, 7]);
    }

    #[test]
    fn test_language_modeling_without_pad_token() {
        let collator = DataCollatorForLanguageModeling::new(None);
        let same = vec![
            example(&[("input_ids", vec![1i64, 2].into())]),
            example(&[("input_ids", vec![3i64, 4].into())]),
        ];
        let batch = collator.collate(same).unwrap();
        assert_eq!(ids(&batch, "labels"), vec![1, 2, 3, 4]);

        let ragged = vec![
            example(&[("input_ids", vec![1i64].into())]),
            example(&[("input_ids", vec![3i64, 4].into())]),
        ];
        assert!(collator.collate(ragged).is_err());
    }
}
