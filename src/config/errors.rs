//! Error code constants

/// Worker / job validation
pub const ERR_MISSING_PLUGIN: &str = "Job.MissingPlugin";
pub const ERR_MISSING_FILE: &str = "Job.MissingFile";

/// Module loading
pub const ERR_FETCH: &str = "Plugin.FetchFailed";
pub const ERR_ENTRY_NOT_FOUND: &str = "Plugin.EntryPointNotFound";
pub const ERR_INSTANTIATION: &str = "Plugin.InstantiationFailed";

/// Invocation
pub const ERR_UNSUPPORTED: &str = "Plugin.Unsupported";
pub const ERR_MALFORMED_RESULT: &str = "Plugin.MalformedResult";
pub const ERR_MODULE_REPORTED: &str = "Plugin.ReportedError";
pub const ERR_INVOCATION: &str = "Runtime.Fault";
pub const ERR_IO: &str = "IO.Failure";

/// Fixed message for jobs that arrive without a plugin.
pub const MISSING_PLUGIN_MESSAGE: &str = "No plugin configuration provided";
pub const MISSING_FILE_MESSAGE: &str = "No file provided";
