pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};

pub use std::io::Write;
pub use std::str::FromStr;

pub use tokio::sync::broadcast;

pub use crate::aggregator::{Aggregator, Summary};
pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{ConnectError, DecodeError, PollError};
pub use crate::gis::frame::DecodedSample;
pub use crate::gis::session::{LinkState, Session};
pub use crate::options::Options;
pub use crate::register::RegisterMap;
pub use crate::{coordinator, gis};
