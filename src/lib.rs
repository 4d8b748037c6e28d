// src/lib.rs

//! smsfeed: live SMS portal feed library

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
