//! CNN Model Architecture for Signage Classification
//!
//! One module type covers both architecture variants. Layers that only the
//! standard variant uses are optional, so `build` always returns the same type.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

use crate::utils::error::SignageError;

/// Which layer stack to build
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ArchitectureVariant {
    /// Double convolutions, batch normalization and dropout in every block,
    /// two dense blocks (canonical)
    Standard,
    /// Single convolution per block, no normalization or dropout, one dense layer
    Compact,
}

/// Configuration for the signage classifier
#[derive(Config, Debug)]
pub struct SignageClassifierConfig {
    #[config(default = "ArchitectureVariant::Standard")]
    pub variant: ArchitectureVariant,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Filters in the first block; later blocks use 2x, 4x and 8x
    #[config(default = "32")]
    pub base_filters: usize,

    /// Dropout after each convolution block (standard variant)
    #[config(default = "0.25")]
    pub conv_dropout: f64,

    #[config(default = "512")]
    pub dense1_units: usize,

    #[config(default = "256")]
    pub dense2_units: usize,

    /// Width of the single dense layer in the compact variant
    #[config(default = "128")]
    pub compact_dense_units: usize,

    /// Dropout after each dense block (standard variant)
    #[config(default = "0.5")]
    pub dense_dropout: f64,
}

impl SignageClassifierConfig {
    /// The simpler fallback architecture with default widths
    pub fn compact() -> Self {
        Self::new().with_variant(ArchitectureVariant::Compact)
    }

    /// Check the configuration for values that cannot build a network
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.in_channels == 0 {
            return Err("in_channels must be > 0".into());
        }
        if self.base_filters == 0 {
            return Err("base_filters must be > 0".into());
        }
        if self.dense1_units == 0 || self.dense2_units == 0 || self.compact_dense_units == 0 {
            return Err("dense layer widths must be > 0".into());
        }
        for (name, rate) in [
            ("conv_dropout", self.conv_dropout),
            ("dense_dropout", self.dense_dropout),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(format!("{} must be in [0, 1), got {}", name, rate));
            }
        }
        Ok(())
    }

    /// Build the network on `device`
    pub fn init<B: Backend>(&self, device: &B::Device) -> SignageClassifier<B> {
        SignageClassifier::new(self, device)
    }
}

/// Validate `config` and build a freshly initialized classifier
pub fn build<B: Backend>(
    config: &SignageClassifierConfig,
    device: &B::Device,
) -> crate::utils::error::Result<SignageClassifier<B>> {
    config.validate().map_err(SignageError::ModelBuild)?;
    Ok(config.init(device))
}

/// Convolution block: conv -> relu [-> conv -> relu -> bn] -> maxpool [-> dropout]
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Option<Conv2d<B>>,
    pub bn: Option<BatchNorm<B>>,
    pub pool: MaxPool2d,
    pub dropout: Option<Dropout>,
    pub relu: Relu,
}

impl<B: Backend> ConvBlock<B> {
    /// Two convolutions with normalization and dropout
    pub fn standard(
        in_channels: usize,
        out_channels: usize,
        dropout: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            conv1: same_conv(in_channels, out_channels, device),
            conv2: Some(same_conv(out_channels, out_channels, device)),
            bn: Some(BatchNormConfig::new(out_channels).init(device)),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: Some(DropoutConfig::new(dropout).init()),
            relu: Relu::new(),
        }
    }

    /// A single convolution followed by pooling
    pub fn compact(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv1: same_conv(in_channels, out_channels, device),
            conv2: None,
            bn: None,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: None,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.relu.forward(self.conv1.forward(x));

        if let Some(conv2) = &self.conv2 {
            x = self.relu.forward(conv2.forward(x));
        }
        if let Some(bn) = &self.bn {
            x = bn.forward(x);
        }

        let x = self.pool.forward(x);

        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

fn same_conv<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Same)
        .init(device)
}

/// Dense block: linear -> relu [-> bn -> dropout]
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub linear: Linear<B>,
    pub bn: Option<BatchNorm<B>>,
    pub dropout: Option<Dropout>,
    pub relu: Relu,
}

impl<B: Backend> DenseBlock<B> {
    pub fn standard(inputs: usize, units: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(inputs, units).init(device),
            bn: Some(BatchNormConfig::new(units).init(device)),
            dropout: Some(DropoutConfig::new(dropout).init()),
            relu: Relu::new(),
        }
    }

    pub fn compact(inputs: usize, units: usize, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(inputs, units).init(device),
            bn: None,
            dropout: None,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.linear.forward(x));

        let x = match &self.bn {
            Some(bn) => {
                // BatchNorm normalizes over channel dim 1 of a [N, C, ...] tensor
                let [batch_size, units] = x.dims();
                bn.forward(x.reshape([batch_size, units, 1, 1]))
                    .reshape([batch_size, units])
            }
            None => x,
        };

        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

/// Signage Classifier CNN
///
/// Architecture:
/// - Rescale raw [0, 255] intensities to [0, 1]
/// - 4 convolution blocks (base, 2x, 4x, 8x filters), each halving resolution
/// - Global Average Pooling
/// - Dense blocks (512 and 256 units for the standard variant)
/// - Single output logit; sigmoid gives P(authorized)
#[derive(Module, Debug)]
pub struct SignageClassifier<B: Backend> {
    pub block1: ConvBlock<B>,
    pub block2: ConvBlock<B>,
    pub block3: ConvBlock<B>,
    pub block4: ConvBlock<B>,

    pub global_pool: AdaptiveAvgPool2d,

    pub dense1: DenseBlock<B>,
    pub dense2: Option<DenseBlock<B>>,
    pub output: Linear<B>,
}

impl<B: Backend> SignageClassifier<B> {
    /// Create a new classifier from configuration
    pub fn new(config: &SignageClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        let widths = [config.in_channels, base, base * 2, base * 4, base * 8];
        let features = base * 8;

        let conv = |i: usize| match config.variant {
            ArchitectureVariant::Standard => {
                ConvBlock::standard(widths[i], widths[i + 1], config.conv_dropout, device)
            }
            ArchitectureVariant::Compact => ConvBlock::compact(widths[i], widths[i + 1], device),
        };

        let (dense1, dense2, output) = match config.variant {
            ArchitectureVariant::Standard => (
                DenseBlock::standard(features, config.dense1_units, config.dense_dropout, device),
                Some(DenseBlock::standard(
                    config.dense1_units,
                    config.dense2_units,
                    config.dense_dropout,
                    device,
                )),
                LinearConfig::new(config.dense2_units, 1).init(device),
            ),
            ArchitectureVariant::Compact => (
                DenseBlock::compact(features, config.compact_dense_units, device),
                None,
                LinearConfig::new(config.compact_dense_units, 1).init(device),
            ),
        };

        Self {
            block1: conv(0),
            block2: conv(1),
            block3: conv(2),
            block4: conv(3),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dense1,
            dense2,
            output,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Raw pixel intensities in [0, 255], shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Logits of shape [batch_size, 1]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = x / 255.0;

        let x = self.block1.forward(x);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);
        let x = self.block4.forward(x);

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dense1.forward(x);
        let x = match &self.dense2 {
            Some(dense2) => dense2.forward(x),
            None => x,
        };

        self.output.forward(x)
    }

    /// Probability of the authorized class, shape [batch_size]
    pub fn forward_probability(&self, x: Tensor<B, 4>) -> Tensor<B, 1> {
        let logits = self.forward(x);
        let [batch_size, _] = logits.dims();
        sigmoid(logits.reshape([batch_size]))
    }

    pub fn variant(&self) -> ArchitectureVariant {
        if self.dense2.is_some() {
            ArchitectureVariant::Standard
        } else {
            ArchitectureVariant::Compact
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny(variant: ArchitectureVariant) -> SignageClassifierConfig {
        SignageClassifierConfig::new()
            .with_variant(variant)
            .with_base_filters(2)
            .with_dense1_units(8)
            .with_dense2_units(4)
            .with_compact_dense_units(4)
    }

    #[test]
    fn test_standard_output_shape() {
        let device = Default::default();
        let model = build::<TestBackend>(&tiny(ArchitectureVariant::Standard), &device).unwrap();

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 1]);
        assert_eq!(model.variant(), ArchitectureVariant::Standard);
    }

    #[test]
    fn test_compact_output_shape() {
        let device = Default::default();
        let model = build::<TestBackend>(&tiny(ArchitectureVariant::Compact), &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device) * 255.0;
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 1]);
        assert!(model.dense2.is_none());
        assert!(model.block1.conv2.is_none());
        assert_eq!(model.variant(), ArchitectureVariant::Compact);
    }

    #[test]
    fn test_probability_in_unit_interval() {
        let device = Default::default();
        let model = tiny(ArchitectureVariant::Standard).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::ones([3, 3, 32, 32], &device) * 128.0;
        let probs = model
            .forward_probability(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(probs.len(), 3);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_full_size_standard_widths() {
        let device = Default::default();
        let model = SignageClassifierConfig::new().init::<TestBackend>(&device);

        assert_eq!(model.block1.conv1.weight.dims(), [32, 3, 3, 3]);
        assert_eq!(model.block4.conv2.as_ref().unwrap().weight.dims(), [256, 256, 3, 3]);
        assert_eq!(model.dense1.linear.weight.dims(), [256, 512]);
        assert_eq!(model.output.weight.dims(), [256, 1]);
    }

    #[test]
    fn test_invalid_config_is_build_error() {
        let device = Default::default();
        let config = SignageClassifierConfig::new().with_conv_dropout(1.5);

        match build::<TestBackend>(&config, &device) {
            Err(SignageError::ModelBuild(msg)) => assert!(msg.contains("conv_dropout")),
            other => panic!("expected ModelBuild error, got {:?}", other.map(|_| ())),
        }
    }
}
