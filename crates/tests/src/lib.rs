//! Cross-crate integration tests for carousel

#[cfg(test)]
mod mixer_integration;
