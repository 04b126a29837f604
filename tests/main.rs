/*!
 * Main test entry point for the subflow test suite
 */

// Import common test utilities
pub mod common;

// Import unit tests
mod unit {
    // App configuration tests
    pub mod app_config_tests;

    // Language code tests
    pub mod language_tests;

    // Segmentation engine tests
    pub mod segmentation_tests;

    // Result merge tests
    pub mod merge_tests;

    // Progress broadcasting tests
    pub mod progress_tests;
}

// Import integration tests
mod integration {
    // End-to-end task execution
    pub mod pipeline_tests;

    // Pause, continue, cancel, restart and delete
    pub mod control_tests;

    // Stale task recovery
    pub mod recovery_tests;
}
