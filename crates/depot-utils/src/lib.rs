//! Filesystem and hashing utilities for the depot package server.
//!
//! This crate provides the two leaf services the package cache is built on:
//! a rooted [`fs::FileSystemProvider`] abstraction over the package folder,
//! and blake3 content digests in [`hash`].

pub mod error;
pub mod fs;
pub mod hash;

pub use error::{FileSystemError, FileSystemResult, HashError, HashResult};
pub use fs::{FileStat, FileSystemProvider, StandardFileSystemProvider};
