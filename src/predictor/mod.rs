//! Free-text price windows in, one formatted prediction out.

pub mod input;
pub mod view;

pub use input::{parse_input, parse_leading_float, PredictionWindow, WINDOW_LEN};
pub use view::{format_currency, PredictorState, PredictorView};
