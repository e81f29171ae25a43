//! Compact fixed-shape graph runtime.
//!
//! An artifact is a small quantized graph: a token embedding followed by a
//! single dense head. The interpreter keeps the backing buffer (usually a
//! memory mapped file) and reads weights in place on every run, so loading an
//! artifact never copies it onto the heap.
//!
//! Layout, all integers little endian:
//!
//! ```text
//! "MFTG" | version u32 | head u32 | activation u32 | seq_len u32
//! vocab u32 | dim u32 | scale f32 | vocab*dim i8
//! out u32 | in u32 | scale f32 | out*in i8 | has_bias u8 | [out f32]
//! ```

use bytemuck::{cast_slice, pod_read_unaligned};
use ndarray::{Array1, Array2, ArrayD, ArrayView2, Axis};
use rand::Rng;
use std::{fs, io, ops::Range, path::Path};
use thiserror::Error;

pub const GRAPH_MAGIC: [u8; 4] = *b"MFTG";
pub const GRAPH_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported graph version: {0}")]
    UnsupportedVersion(u32),
    #[error("unknown head kind: {0}")]
    UnknownHead(u32),
    #[error("unknown activation: {0}")]
    UnknownActivation(u32),
    #[error("artifact truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("empty {0} dimension")]
    EmptyDimension(&'static str),
    #[error("dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("input shape mismatch: expected {expected:?}, actual {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("token id {token} outside vocabulary of {vocab}")]
    TokenOutOfRange { token: i32, vocab: usize },
}

/// How the dense head consumes the embedded sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadKind {
    /// Mean-pool the sequence, one score row per input.
    Pooled,
    /// One score row per token position.
    PerToken,
}

impl HeadKind {
    fn from_u32(v: u32) -> Result<Self, ModelError> {
        match v {
            0 => Ok(Self::Pooled),
            1 => Ok(Self::PerToken),
            other => Err(ModelError::UnknownHead(other)),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Self::Pooled => 0,
            Self::PerToken => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Softmax,
}

impl Activation {
    fn from_u32(v: u32) -> Result<Self, ModelError> {
        match v {
            0 => Ok(Self::Identity),
            1 => Ok(Self::Softmax),
            other => Err(ModelError::UnknownActivation(other)),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Self::Identity => 0,
            Self::Softmax => 1,
        }
    }

    fn apply(self, scores: &mut Array2<f32>) {
        if self == Self::Softmax {
            softmax_rows(scores);
        }
    }
}

fn softmax_rows(scores: &mut Array2<f32>) {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}

/// A runtime-bound executable graph with shapes fixed at construction.
pub trait Interpreter: Send {
    fn input_shape(&self) -> &[usize];
    fn output_shape(&self) -> &[usize];
    /// Execute one batch-of-one inference.
    fn run(&mut self, input: ArrayView2<'_, i32>) -> Result<ArrayD<f32>, ModelError>;
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<Range<usize>, ModelError> {
        let available = self.buf.len().saturating_sub(self.offset);
        if len > available {
            return Err(ModelError::Truncated {
                offset: self.offset,
                needed: len,
                available,
            });
        }
        let range = self.offset..self.offset + len;
        self.offset += len;
        Ok(range)
    }

    fn u8(&mut self) -> Result<u8, ModelError> {
        let r = self.take(1)?;
        Ok(self.buf[r.start])
    }

    fn u32(&mut self) -> Result<u32, ModelError> {
        let r = self.take(4)?;
        Ok(u32::from_le(pod_read_unaligned(&self.buf[r])))
    }

    fn f32(&mut self) -> Result<f32, ModelError> {
        self.u32().map(f32::from_bits)
    }

    fn dim(&mut self, name: &'static str) -> Result<usize, ModelError> {
        match self.u32()? {
            0 => Err(ModelError::EmptyDimension(name)),
            n => Ok(n as usize),
        }
    }
}

fn read_f32_le(bytes: &[u8]) -> f32 {
    f32::from_bits(u32::from_le(pod_read_unaligned(bytes)))
}

/// Parsed offsets into an artifact buffer.
#[derive(Clone, Debug)]
pub struct GraphLayout {
    pub head: HeadKind,
    pub activation: Activation,
    pub seq_len: usize,
    pub vocab: usize,
    pub dim: usize,
    pub classes: usize,
    embed_scale: f32,
    embed: Range<usize>,
    head_scale: f32,
    head_weights: Range<usize>,
    bias: Option<Range<usize>>,
}

impl GraphLayout {
    pub fn parse(buf: &[u8]) -> Result<Self, ModelError> {
        let mut r = Reader::new(buf);
        let magic = r.take(4)?;
        if &buf[magic] != GRAPH_MAGIC.as_slice() {
            return Err(ModelError::InvalidMagic);
        }
        let version = r.u32()?;
        if version != GRAPH_VERSION {
            return Err(ModelError::UnsupportedVersion(version));
        }
        let head = HeadKind::from_u32(r.u32()?)?;
        let activation = Activation::from_u32(r.u32()?)?;
        let seq_len = r.dim("sequence")?;

        let vocab = r.dim("vocabulary")?;
        let dim = r.dim("embedding")?;
        let embed_scale = r.f32()?;
        let embed = r.take(vocab.saturating_mul(dim))?;

        let classes = r.dim("output")?;
        let in_features = r.u32()? as usize;
        if in_features != dim {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                actual: in_features,
            });
        }
        let head_scale = r.f32()?;
        let head_weights = r.take(classes.saturating_mul(dim))?;
        let bias = match r.u8()? {
            0 => None,
            _ => Some(r.take(classes.saturating_mul(4))?),
        };

        Ok(Self {
            head,
            activation,
            seq_len,
            vocab,
            dim,
            classes,
            embed_scale,
            embed,
            head_scale,
            head_weights,
            bias,
        })
    }

    pub fn input_shape(&self) -> Vec<usize> {
        vec![1, self.seq_len]
    }

    pub fn output_shape(&self) -> Vec<usize> {
        match self.head {
            HeadKind::Pooled => vec![1, self.classes],
            HeadKind::PerToken => vec![1, self.seq_len, self.classes],
        }
    }
}

/// Interpreter over a compact graph held in `B`.
pub struct CompactInterpreter<B> {
    buf: B,
    layout: GraphLayout,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl<B: AsRef<[u8]>> CompactInterpreter<B> {
    pub fn new(buf: B) -> Result<Self, ModelError> {
        let layout = GraphLayout::parse(buf.as_ref())?;
        let input_shape = layout.input_shape();
        let output_shape = layout.output_shape();
        Ok(Self {
            buf,
            layout,
            input_shape,
            output_shape,
        })
    }

    pub fn layout(&self) -> &GraphLayout {
        &self.layout
    }

    fn embed(&self, tokens: &[i32]) -> Result<Array2<f32>, ModelError> {
        let GraphLayout {
            vocab,
            dim,
            embed_scale,
            ..
        } = self.layout;
        let weights: &[i8] = cast_slice(&self.buf.as_ref()[self.layout.embed.clone()]);
        let mut out = Array2::<f32>::zeros((tokens.len(), dim));
        for (i, &tok) in tokens.iter().enumerate() {
            let id = usize::try_from(tok)
                .ok()
                .filter(|&id| id < vocab)
                .ok_or(ModelError::TokenOutOfRange { token: tok, vocab })?;
            let row = &weights[id * dim..(id + 1) * dim];
            for (d, &w) in row.iter().enumerate() {
                out[[i, d]] = w as f32 * embed_scale;
            }
        }
        Ok(out)
    }

    fn project(&self, x: &Array2<f32>) -> Array2<f32> {
        let bytes = self.buf.as_ref();
        let GraphLayout {
            dim,
            classes,
            head_scale,
            ..
        } = self.layout;
        let weights: &[i8] = cast_slice(&bytes[self.layout.head_weights.clone()]);
        let weight =
            Array2::from_shape_fn((classes, dim), |(i, j)| weights[i * dim + j] as f32 * head_scale);
        let mut out = x.dot(&weight.t());
        if let Some(range) = &self.layout.bias {
            let bias = Array1::from_iter(bytes[range.clone()].chunks_exact(4).map(read_f32_le));
            out += &bias.view().insert_axis(Axis(0));
        }
        out
    }
}

impl<B: AsRef<[u8]> + Send> Interpreter for CompactInterpreter<B> {
    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    fn run(&mut self, input: ArrayView2<'_, i32>) -> Result<ArrayD<f32>, ModelError> {
        if input.shape() != self.input_shape.as_slice() {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_shape.clone(),
                actual: input.shape().to_vec(),
            });
        }
        let tokens = input.row(0).to_vec();
        let hidden = self.embed(&tokens)?;
        let out = match self.layout.head {
            HeadKind::Pooled => {
                let pooled = hidden
                    .mean_axis(Axis(0))
                    .ok_or(ModelError::EmptyDimension("sequence"))?
                    .insert_axis(Axis(0));
                let mut scores = self.project(&pooled);
                self.layout.activation.apply(&mut scores);
                scores.into_dyn()
            }
            HeadKind::PerToken => {
                let mut scores = self.project(&hidden);
                self.layout.activation.apply(&mut scores);
                scores.insert_axis(Axis(0)).into_dyn()
            }
        };
        Ok(out)
    }
}

/// Shape description of a graph to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphSpec {
    pub head: HeadKind,
    pub activation: Activation,
    pub seq_len: usize,
    pub vocab: usize,
    pub dim: usize,
    pub classes: usize,
}

impl GraphSpec {
    pub fn sequence_classifier(seq_len: usize, classes: usize) -> Self {
        Self {
            head: HeadKind::Pooled,
            activation: Activation::Softmax,
            seq_len,
            vocab: 1024,
            dim: 32,
            classes,
        }
    }

    pub fn token_classifier(seq_len: usize, labels: usize) -> Self {
        Self {
            head: HeadKind::PerToken,
            ..Self::sequence_classifier(seq_len, labels)
        }
    }

    pub fn with_vocab(mut self, vocab: usize) -> Self {
        self.vocab = vocab;
        self
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }
}

/// Simple quantization of a tensor to 8-bit integers with a scale factor.
fn quantize_tensor(t: &Array2<f32>) -> (Vec<i8>, f32) {
    let max = t.iter().fold(0.0_f32, |m, &v| m.max(v.abs()));
    let scale = if max == 0.0 { 1.0 } else { 127.0 / max };
    let data = t.iter().map(|&v| (v * scale).round() as i8).collect();
    (data, 1.0 / scale)
}

/// Float weights of a graph, serialized into the compact format on save.
#[derive(Clone, Debug)]
pub struct CompactGraph {
    pub spec: GraphSpec,
    embed: Array2<f32>,
    head: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl CompactGraph {
    pub fn new(
        spec: GraphSpec,
        embed: Array2<f32>,
        head: Array2<f32>,
        bias: Option<Array1<f32>>,
    ) -> Result<Self, ModelError> {
        check_dim(spec.vocab, embed.nrows())?;
        check_dim(spec.dim, embed.ncols())?;
        check_dim(spec.classes, head.nrows())?;
        check_dim(spec.dim, head.ncols())?;
        if let Some(b) = &bias {
            check_dim(spec.classes, b.len())?;
        }
        Ok(Self {
            spec,
            embed,
            head,
            bias,
        })
    }

    /// Random weights for demos and tests.
    pub fn random(spec: GraphSpec) -> Self {
        let mut rng = rand::thread_rng();
        let embed = Array2::from_shape_fn((spec.vocab, spec.dim), |_| rng.gen_range(-0.1..0.1));
        let head = Array2::from_shape_fn((spec.classes, spec.dim), |_| rng.gen_range(-0.1..0.1));
        let bias = Some(Array1::from_shape_fn(spec.classes, |_| rng.gen_range(-0.1..0.1)));
        Self {
            spec,
            embed,
            head,
            bias,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let spec = &self.spec;
        let mut out = Vec::with_capacity(
            48 + spec.vocab * spec.dim + spec.classes * spec.dim + spec.classes * 4,
        );
        fn put_u32(out: &mut Vec<u8>, v: usize) {
            out.extend_from_slice(&(v as u32).to_le_bytes());
        }

        out.extend_from_slice(&GRAPH_MAGIC);
        out.extend_from_slice(&GRAPH_VERSION.to_le_bytes());
        out.extend_from_slice(&spec.head.as_u32().to_le_bytes());
        out.extend_from_slice(&spec.activation.as_u32().to_le_bytes());
        put_u32(&mut out, spec.seq_len);

        let (weight, scale) = quantize_tensor(&self.embed);
        put_u32(&mut out, spec.vocab);
        put_u32(&mut out, spec.dim);
        out.extend_from_slice(&scale.to_le_bytes());
        out.extend_from_slice(cast_slice(&weight));

        let (weight, scale) = quantize_tensor(&self.head);
        put_u32(&mut out, spec.classes);
        put_u32(&mut out, spec.dim);
        out.extend_from_slice(&scale.to_le_bytes());
        out.extend_from_slice(cast_slice(&weight));
        match &self.bias {
            Some(b) => {
                out.push(1);
                for v in b.iter() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            None => out.push(0),
        }
        out
    }

    /// Write the artifact, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes())
    }
}

fn check_dim(expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected != actual {
        return Err(ModelError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(head: HeadKind) -> GraphSpec {
        GraphSpec {
            head,
            activation: Activation::Softmax,
            seq_len: 4,
            vocab: 8,
            dim: 3,
            classes: 2,
        }
    }

    #[test]
    fn parse_reports_shapes() {
        let bytes = CompactGraph::random(small(HeadKind::PerToken)).to_bytes();
        let layout = GraphLayout::parse(&bytes).unwrap();
        assert_eq!(layout.input_shape(), vec![1, 4]);
        assert_eq!(layout.output_shape(), vec![1, 4, 2]);
        assert_eq!(layout.vocab, 8);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = CompactGraph::random(small(HeadKind::Pooled)).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(GraphLayout::parse(&bytes), Err(ModelError::InvalidMagic)));
    }

    #[test]
    fn rejects_truncated_artifact() {
        let bytes = CompactGraph::random(small(HeadKind::Pooled)).to_bytes();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(GraphLayout::parse(cut), Err(ModelError::Truncated { .. })));
    }

    #[test]
    fn pooled_softmax_sums_to_one() {
        let bytes = CompactGraph::random(small(HeadKind::Pooled)).to_bytes();
        let mut interp = CompactInterpreter::new(bytes).unwrap();
        let input = Array2::from_shape_vec((1, 4), vec![0, 1, 2, 7]).unwrap();
        let out = interp.run(input.view()).unwrap();
        assert_eq!(out.shape(), &[1, 2]);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn token_outside_vocab_is_rejected() {
        let bytes = CompactGraph::random(small(HeadKind::Pooled)).to_bytes();
        let mut interp = CompactInterpreter::new(bytes).unwrap();
        let input = Array2::from_shape_vec((1, 4), vec![0, 1, 8, -1]).unwrap();
        assert!(matches!(
            interp.run(input.view()),
            Err(ModelError::TokenOutOfRange { token: 8, vocab: 8 })
        ));
    }

    #[test]
    fn wrong_input_shape_is_rejected() {
        let bytes = CompactGraph::random(small(HeadKind::PerToken)).to_bytes();
        let mut interp = CompactInterpreter::new(bytes).unwrap();
        let input = Array2::<i32>::zeros((1, 5));
        assert!(matches!(interp.run(input.view()), Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn identity_head_matches_float_weights() {
        let spec = GraphSpec {
            activation: Activation::Identity,
            vocab: 2,
            dim: 1,
            classes: 1,
            seq_len: 2,
            head: HeadKind::PerToken,
        };
        let embed = Array2::from_shape_vec((2, 1), vec![0.5, -1.0]).unwrap();
        let head = Array2::from_shape_vec((1, 1), vec![2.0]).unwrap();
        let graph = CompactGraph::new(spec, embed, head, Some(Array1::from(vec![0.25]))).unwrap();
        let mut interp = CompactInterpreter::new(graph.to_bytes()).unwrap();
        let input = Array2::from_shape_vec((1, 2), vec![0, 1]).unwrap();
        let out = interp.run(input.view()).unwrap();
        assert_eq!(out.shape(), &[1, 2, 1]);
        assert!((out[[0, 0, 0]] - 1.25).abs() < 0.02);
        assert!((out[[0, 1, 0]] + 1.75).abs() < 0.02);
    }
}
