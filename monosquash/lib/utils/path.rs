//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The file at the root of an export that maps repositories and tags to layer ids.
pub const REPOSITORIES_FILENAME: &str = "repositories";

/// The metadata document inside each layer directory.
pub const LAYER_JSON_FILENAME: &str = "json";

/// The packed filesystem diff inside each layer directory.
pub const LAYER_TAR_FILENAME: &str = "layer.tar";

/// The version marker inside each layer directory.
pub const LAYER_VERSION_FILENAME: &str = "VERSION";

/// The contents written to the version marker of new layers.
pub const LAYER_VERSION: &str = "1.0";

/// The sub directory of a layer directory that holds its extracted diff.
pub const EXTRACTED_LAYER_SUBDIR: &str = "layer";

/// The prefix of the working directory created for each run.
pub const WORK_DIR_PREFIX: &str = "monosquash";

/// The environment variable that overrides where working directories are created.
pub const MONOSQUASH_TMPDIR_ENV_VAR: &str = "MONOSQUASH_TMPDIR";

/// The prefix that marks a whiteout entry in a layer diff.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The entry that marks its directory as opaque in a layer diff.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// The command fragment recorded on layers created by a squash.
pub const SQUASH_MARKER: &str = "#(squash)";

/// The command fragment of the layer that starts a base image.
pub const FROM_MARKER: &str = "#(nop) ADD file";

/// The comment recorded on layers created by a squash.
pub const SQUASH_COMMENT: &str = "squashed w/ monosquash";

/// The PAX record prefix under which extended attributes are stored in layer archives.
pub const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";
