//! Transfer-learning classifier: a frozen MobileNetV2-style backbone and a
//! small trainable head.
//!
//! Architecture:
//! - Backbone: 3x3 stem, 17 inverted residual blocks, 1x1 feature conv,
//!   global average pooling
//! - Head: optional Dense(relu) + Dropout, then Dense(3)
//!
//! All weights are initialized from explicit seeds. The backbone uses
//! `seed`, the dense layer `seed + 1` and the output layer `seed + 2`
//! (`seed + 1` when there is no dense layer).

use burn::{
    config::Config,
    module::{AutodiffModule, Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    record::CompactRecorder,
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Tensor,
    },
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rps_core::{Error, ModelSettings, NUM_CLASSES};
use std::path::Path;

/// Inverted residual settings: expansion, output channels, repeats, first stride
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

/// Configuration for [`RpsClassifier`]
#[derive(Config, Debug)]
pub struct RpsClassifierConfig {
    #[config(default = "3")]
    pub num_classes: usize,

    /// Backbone channel multiplier
    #[config(default = "1.0")]
    pub width_multiplier: f64,

    #[config(default = "1024")]
    pub dense_units: usize,

    /// Dropout after the dense layer; `None` drops the dense block
    pub dropout: Option<f64>,

    #[config(default = "1234")]
    pub seed: u64,
}

impl RpsClassifierConfig {
    /// Config for the run described by `settings`
    pub fn from_settings(settings: &ModelSettings, seed: u64) -> Self {
        Self::new()
            .with_num_classes(NUM_CLASSES)
            .with_width_multiplier(settings.width_multiplier)
            .with_dense_units(settings.dense_units)
            .with_dropout(settings.dropout)
            .with_seed(seed)
    }

    /// Builds the model
    pub fn init<B: Backend>(&self, device: &B::Device) -> RpsClassifier<B> {
        let backbone = MobileNetV2::new(self.width_multiplier, self.seed, device);
        let head = ClassifierHead::new(self, backbone.num_features(), device);
        RpsClassifier { backbone, head }
    }
}

/// Rounds channel counts to multiples of 8, never dropping more than 10%
fn make_divisible(value: f64, divisor: usize) -> usize {
    let rounded = ((value + divisor as f64 / 2.0) as usize / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * value {
        rounded + divisor
    } else {
        rounded
    }
}

fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}

/// Uniform `[-limit, limit)` parameter drawn from `rng`
fn seeded_uniform<B: Backend, const D: usize>(
    shape: [usize; D],
    limit: f64,
    rng: &mut ChaCha8Rng,
    device: &B::Device,
) -> Param<Tensor<B, D>> {
    let count = shape.iter().product();
    let values: Vec<f32> = (0..count)
        .map(|_| rng.gen_range(-limit..limit) as f32)
        .collect();
    Param::from_tensor(Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape(shape))
}

/// Glorot-uniform weights and zero bias
fn seeded_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    seed: u64,
    device: &B::Device,
) -> Linear<B> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let limit = (6.0 / (d_input + d_output) as f64).sqrt();

    let mut linear = LinearConfig::new(d_input, d_output).init(device);
    linear.weight = seeded_uniform([d_input, d_output], limit, &mut rng, device);
    linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
    linear
}

/// Convolution without bias followed by batch norm
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        rng: &mut ChaCha8Rng,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel - 1) / 2;
        let mut conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        // He-uniform
        let fan_in = channels[0] / groups * kernel * kernel;
        let limit = (6.0 / fan_in as f64).sqrt();
        conv.weight = seeded_uniform(
            [channels[1], channels[0] / groups, kernel, kernel],
            limit,
            rng,
            device,
        );

        Self {
            conv,
            bn: BatchNormConfig::new(channels[1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Expand (1x1) → depthwise (3x3) → linear projection (1x1), with a skip
/// connection when the shape is preserved
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        expansion: usize,
        rng: &mut ChaCha8Rng,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        let expand = (expansion != 1).then(|| ConvBn::new([in_channels, hidden], 1, 1, 1, rng, device));
        let depthwise = ConvBn::new([hidden, hidden], 3, stride, hidden, rng, device);
        let project = ConvBn::new([hidden, out_channels], 1, 1, 1, rng, device);
        Self {
            expand,
            depthwise,
            project,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => relu6(expand.forward(input.clone())),
            None => input.clone(),
        };
        let x = relu6(self.depthwise.forward(x));
        let x = self.project.forward(x);

        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV2-style feature extractor ending in global average pooling
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<InvertedResidual<B>>,
    last: ConvBn<B>,
    pool: AdaptiveAvgPool2d,
    num_features: usize,
}

impl<B: Backend> MobileNetV2<B> {
    pub fn new(width_multiplier: f64, seed: u64, device: &B::Device) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut channels = make_divisible(STEM_CHANNELS as f64 * width_multiplier, 8);
        let stem = ConvBn::new([3, channels], 3, 2, 1, &mut rng, device);

        let mut blocks = Vec::new();
        for (expansion, out, repeats, stride) in INVERTED_RESIDUAL_SETTINGS {
            let out = make_divisible(out as f64 * width_multiplier, 8);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(InvertedResidual::new(channels, out, stride, expansion, &mut rng, device));
                channels = out;
            }
        }

        let num_features = make_divisible(LAST_CHANNELS as f64 * width_multiplier.max(1.0), 8);
        let last = ConvBn::new([channels, num_features], 1, 1, 1, &mut rng, device);

        Self {
            stem,
            blocks,
            last,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            num_features,
        }
    }

    /// Width of the pooled feature vector
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// `[batch, 3, H, W]` → `[batch, num_features]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu6(self.stem.forward(images));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = relu6(self.last.forward(x));
        let x = self.pool.forward(x);

        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}

/// Dense + ReLU + Dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    linear: Linear<B>,
    activation: Relu,
    dropout: Dropout,
}

/// Trainable head on top of the pooled features
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub dense: Option<DenseBlock<B>>,
    pub output: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(config: &RpsClassifierConfig, num_features: usize, device: &B::Device) -> Self {
        let dense = config.dropout.map(|rate| DenseBlock {
            linear: seeded_linear(num_features, config.dense_units, config.seed + 1, device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(rate).init(),
        });

        let output = match dense {
            Some(_) => seeded_linear(config.dense_units, config.num_classes, config.seed + 2, device),
            None => seeded_linear(num_features, config.num_classes, config.seed + 1, device),
        };

        Self { dense, output }
    }

    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = match &self.dense {
            Some(block) => {
                let x = block.activation.forward(block.linear.forward(features));
                block.dropout.forward(x)
            }
            None => features,
        };
        self.output.forward(x)
    }
}

/// Rock/paper/scissors classifier
#[derive(Module, Debug)]
pub struct RpsClassifier<B: Backend> {
    pub backbone: MobileNetV2<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> RpsClassifier<B> {
    /// Logits `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Class probabilities `[batch, num_classes]`
    pub fn forward_softmax(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Replaces the backbone weights with a record saved by [`CompactRecorder`]
    pub fn with_pretrained_backbone(mut self, path: &Path, device: &B::Device) -> rps_core::Result<Self> {
        let recorder = CompactRecorder::new();
        self.backbone = self
            .backbone
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|e| {
                Error::Model(format!(
                    "Failed to load backbone weights {}: {:?}",
                    path.display(),
                    e
                ))
            })?;
        Ok(self)
    }
}

impl<B: AutodiffBackend> RpsClassifier<B> {
    /// Training forward pass. The backbone runs on the inner backend, so it
    /// receives no gradients and its batch norms stay in inference mode.
    pub fn forward_frozen(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.clone().valid().forward(images.inner());
        self.head.forward(Tensor::from_inner(features))
    }
}
