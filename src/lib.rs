#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::op_ref
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod geometry;
pub mod input;
pub mod lixel;
pub mod normalize;
pub mod pipeline;
pub mod projection;
pub mod protocol;
pub mod result_mapper;
pub mod road_graph;


pub use config::NkdvConfig;
pub use error::{PipelineError, Stage};
pub use pipeline::{CancellationToken, Pipeline, RunContext};
