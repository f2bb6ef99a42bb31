use super::Filter;
use crate::error::Result;
use crate::imagestack::ImageStack;

// Zero every intensity below `v_min`.
pub struct ClipValueToZero {
    v_min: f32,
}

impl ClipValueToZero {
    pub fn new(v_min: f32) -> Self {
        ClipValueToZero { v_min }
    }
}

impl Filter for ClipValueToZero {
    fn name(&self) -> &'static str {
        "residual clipping"
    }

    fn run(&self, stack: &ImageStack) -> Result<ImageStack> {
        let v_min = self.v_min;
        Ok(stack.map_data(|data| data.mapv(|v| if v < v_min { 0.0 } else { v })))
    }
}
