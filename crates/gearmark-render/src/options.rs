// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use serde::Deserialize;

use crate::{ModelError, RenderSize};

pub const DEFAULT_SIZE: RenderSize = RenderSize::new(1024, 800);

/// MSAA sample count. Only powers of two up to 64 exist in Vulkan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u32")]
pub struct SampleCount(u32);

impl SampleCount {
    pub const ONE: SampleCount = SampleCount(1);

    pub fn new(n: u32) -> Result<Self, ModelError> {
        match n {
            1 | 2 | 4 | 8 | 16 | 32 | 64 => Ok(Self(n)),
            _ => Err(ModelError::UnsupportedSampleCount(n)),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for SampleCount {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<u32> for SampleCount {
    type Error = ModelError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl fmt::Display for SampleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested presentation mode. FIFO is the fallback whenever the request
/// isn't supported by the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentPreference {
    #[default]
    Immediate,
    Mailbox,
    Fifo,
}

/// How many frames the CPU may record ahead of the GPU. One serialises
/// CPU and GPU every frame; two overlaps them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u32")]
pub struct FramesInFlight(u32);

impl FramesInFlight {
    pub const MAX: u32 = 2;

    pub fn new(n: u32) -> Result<Self, ModelError> {
        if (1..=Self::MAX).contains(&n) {
            Ok(Self(n))
        } else {
            Err(ModelError::InvalidFramesInFlight(n))
        }
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl Default for FramesInFlight {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

impl TryFrom<u32> for FramesInFlight {
    type Error = ModelError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error, StrDeserializer, U32Deserializer};
    use serde::de::IntoDeserializer;

    fn from_u32<'de, T: Deserialize<'de>>(n: u32) -> Result<T, Error> {
        let d: U32Deserializer<Error> = n.into_deserializer();
        T::deserialize(d)
    }

    #[test]
    fn sample_counts_are_powers_of_two() {
        for n in [1, 2, 4, 8, 16, 32, 64] {
            assert_eq!(SampleCount::new(n).map(SampleCount::get), Ok(n));
        }
        for n in [0, 3, 6, 128] {
            assert_eq!(SampleCount::new(n), Err(ModelError::UnsupportedSampleCount(n)));
        }
        assert_eq!(SampleCount::default(), SampleCount::ONE);
    }

    #[test]
    fn config_values_go_through_validation() {
        assert_eq!(from_u32::<SampleCount>(4).map(SampleCount::get), Ok(4));
        assert!(from_u32::<SampleCount>(128).is_err());
        assert_eq!(from_u32::<FramesInFlight>(1).map(FramesInFlight::get), Ok(1));
        assert!(from_u32::<FramesInFlight>(3).is_err());
    }

    #[test]
    fn present_preference_names() {
        let d: StrDeserializer<Error> = "mailbox".into_deserializer();
        assert_eq!(PresentPreference::deserialize(d), Ok(PresentPreference::Mailbox));
        let d: StrDeserializer<Error> = "tearing".into_deserializer();
        assert!(PresentPreference::deserialize(d).is_err());
        assert_eq!(PresentPreference::default(), PresentPreference::Immediate);
    }

    #[test]
    fn frames_in_flight_bounds() {
        assert_eq!(FramesInFlight::default().get(), 2);
        assert!(FramesInFlight::new(0).is_err());
        assert!(FramesInFlight::new(3).is_err());
    }
}
