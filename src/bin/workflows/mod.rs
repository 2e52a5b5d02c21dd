mod commands;
mod layout;
mod list;

pub(crate) use commands::{
    run_buildextend, run_compress, run_decompress, run_upload, BuildExtendArgs, CompressArgs,
    DecompressArgs, UploadArgs,
};
pub(crate) use layout::locate_workdir;
pub(crate) use list::run_list;
