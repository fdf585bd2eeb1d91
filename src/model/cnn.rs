//! CNN Model Architecture for Brain Tumor Classification
//!
//! A stack of convolutional blocks followed by dense blocks and a single
//! logit. The sigmoid of that logit is the tumor probability.
//!
//! Two layouts are provided:
//! - [`ClassifierConfig::standard`]: 4 conv blocks (32..256), same padding,
//!   dense 512 -> 256
//! - [`ClassifierConfig::deep`]: 5 conv blocks (32..512), valid padding,
//!   dense 512 -> 256 -> 128

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::preprocessing::IMAGE_SIZE;
use crate::utils::error::MriError;

/// Topology of the tumor classifier
#[derive(Config, Debug, PartialEq)]
pub struct ClassifierConfig {
    /// Output channels of each conv block
    pub conv_channels: Vec<usize>,

    /// Units of each dense block
    pub dense_units: Vec<usize>,

    /// Dropout after each dense block
    pub dense_dropout: Vec<f64>,

    /// `same` padding when true, `valid` otherwise
    #[config(default = "true")]
    pub same_padding: bool,

    /// Dropout after each conv block
    #[config(default = "0.25")]
    pub conv_dropout: f64,

    /// Input image size (square)
    #[config(default = "128")]
    pub input_size: usize,

    /// Number of input channels (1 for grayscale)
    #[config(default = "1")]
    pub in_channels: usize,
}

impl ClassifierConfig {
    /// Four conv blocks with same padding
    pub fn standard() -> Self {
        Self::new(vec![32, 64, 128, 256], vec![512, 256], vec![0.5, 0.5])
    }

    /// Five conv blocks with valid padding and a third dense block
    pub fn deep() -> Self {
        Self::new(
            vec![32, 64, 128, 256, 512],
            vec![512, 256, 128],
            vec![0.5, 0.5, 0.3],
        )
        .with_same_padding(false)
    }

    /// Side length of the feature map after the last conv block
    pub fn feature_map_size(&self) -> usize {
        self.conv_channels.iter().fold(self.input_size, |size, _| {
            let size = if self.same_padding {
                size
            } else {
                size.saturating_sub(2)
            };
            size / 2
        })
    }

    /// Length of the flattened conv output
    pub fn flatten_size(&self) -> usize {
        let side = self.feature_map_size();
        self.conv_channels.last().copied().unwrap_or(self.in_channels) * side * side
    }

    /// Reject topologies this crate cannot train or serve
    ///
    /// Preprocessing always yields single-channel `IMAGE_SIZE` squares, so any
    /// other input geometry would fail inside the first matmul.
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        if self.input_size != IMAGE_SIZE || self.in_channels != 1 {
            return Err(MriError::Config(format!(
                "input must be {}x{}x1, got {}x{}x{}",
                IMAGE_SIZE, IMAGE_SIZE, self.input_size, self.input_size, self.in_channels
            )));
        }
        if self.conv_channels.is_empty() {
            return Err(MriError::Config("at least one conv block is required".into()));
        }
        if self.dense_units.len() != self.dense_dropout.len() {
            return Err(MriError::Config(format!(
                "{} dense blocks but {} dropout rates",
                self.dense_units.len(),
                self.dense_dropout.len()
            )));
        }
        if self.feature_map_size() == 0 {
            return Err(MriError::Config(format!(
                "input size {} is too small for {} conv blocks",
                self.input_size,
                self.conv_channels.len()
            )));
        }
        let rates = self.dense_dropout.iter().chain(std::iter::once(&self.conv_dropout));
        for &rate in rates {
            if !(0.0..1.0).contains(&rate) {
                return Err(MriError::Config(format!("dropout {} not in [0, 1)", rate)));
            }
        }
        Ok(())
    }

    /// Short human readable description
    pub fn describe(&self) -> String {
        format!(
            "CNN: {} conv blocks {:?} ({} padding), dense {:?}, sigmoid output",
            self.conv_channels.len(),
            self.conv_channels,
            if self.same_padding { "same" } else { "valid" },
            self.dense_units
        )
    }

    /// Build an untrained classifier
    pub fn init<B: Backend>(&self, device: &B::Device) -> TumorClassifier<B> {
        TumorClassifier::new(self, device)
    }
}

/// Build an untrained classifier from a configuration
pub fn build_model<B: Backend>(config: &ClassifierConfig, device: &B::Device) -> TumorClassifier<B> {
    config.init(device)
}

/// Conv 3x3 -> ReLU -> BatchNorm -> MaxPool 2x2 -> Dropout
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub relu: Relu,
    pub bn: BatchNorm<B, 2>,
    pub pool: MaxPool2d,
    pub dropout: Dropout,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        same_padding: bool,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        let padding = if same_padding {
            PaddingConfig2d::Same
        } else {
            PaddingConfig2d::Valid
        };
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(padding)
            .init(device);

        Self {
            conv,
            relu: Relu::new(),
            bn: BatchNormConfig::new(out_channels).init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.relu.forward(x);
        let x = self.bn.forward(x);
        let x = self.pool.forward(x);
        self.dropout.forward(x)
    }
}

/// Linear -> ReLU -> optional BatchNorm -> Dropout
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub linear: Linear<B>,
    pub relu: Relu,
    pub bn: Option<BatchNorm<B, 1>>,
    pub dropout: Dropout,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(
        in_features: usize,
        out_features: usize,
        batch_norm: bool,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            linear: LinearConfig::new(in_features, out_features).init(device),
            relu: Relu::new(),
            bn: batch_norm.then(|| BatchNormConfig::new(out_features).init(device)),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = self.relu.forward(x);
        let x = match &self.bn {
            Some(bn) => {
                // BatchNorm expects [N, C, ...]
                let [batch, features] = x.dims();
                bn.forward(x.reshape([batch, features, 1]))
                    .reshape([batch, features])
            }
            None => x,
        };
        self.dropout.forward(x)
    }
}

/// Binary tumor classifier
#[derive(Module, Debug)]
pub struct TumorClassifier<B: Backend> {
    pub conv_blocks: Vec<ConvBlock<B>>,
    pub dense_blocks: Vec<DenseBlock<B>>,
    pub head: Linear<B>,
}

impl<B: Backend> TumorClassifier<B> {
    pub fn new(config: &ClassifierConfig, device: &B::Device) -> Self {
        let mut conv_blocks = Vec::with_capacity(config.conv_channels.len());
        let mut in_channels = config.in_channels;
        for &out_channels in &config.conv_channels {
            conv_blocks.push(ConvBlock::new(
                in_channels,
                out_channels,
                config.same_padding,
                config.conv_dropout,
                device,
            ));
            in_channels = out_channels;
        }

        let mut dense_blocks = Vec::with_capacity(config.dense_units.len());
        let mut in_features = config.flatten_size();
        for (i, (&units, &dropout)) in config
            .dense_units
            .iter()
            .zip(config.dense_dropout.iter())
            .enumerate()
        {
            dense_blocks.push(DenseBlock::new(in_features, units, i == 0, dropout, device));
            in_features = units;
        }

        Self {
            conv_blocks,
            dense_blocks,
            head: LinearConfig::new(in_features, 1).init(device),
        }
    }

    /// Input `[N, 1, 128, 128]`, output logits `[N, 1]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.conv_blocks {
            x = block.forward(x);
        }

        let [batch, channels, height, width] = x.dims();
        let mut x = x.reshape([batch, channels * height * width]);
        for block in &self.dense_blocks {
            x = block.forward(x);
        }

        self.head.forward(x)
    }

    /// Tumor probability `[N, 1]` in `[0, 1]`
    pub fn forward_probability(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(x))
    }
}
