mod file_attrs;
mod item;
mod open;
mod status;

pub use self::{
    file_attrs::{FileAttributes, FileMode, FileType},
    item::Item,
    open::OpenFlags,
    status::StatusCode,
};
