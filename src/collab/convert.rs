//! Image-format converter collaborators.
//!
//! Deriving a platform image is two external calls: the platform-tag tool
//! copies the generic qemu image with the platform identifier set, then
//! `qemu-img convert` re-containers it for the target cloud.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::collab::Toolbox;
use crate::error::Result;
use crate::process::Cmd;

/// Cloud and virtualization targets a platform image can be derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Aws,
    Azure,
    DigitalOcean,
    Exoscale,
    IbmCloud,
    Nutanix,
    OpenStack,
}

/// Container format produced for a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformFormat {
    /// `qemu-img -O` format name.
    pub format: &'static str,
    /// Extra `qemu-img -o` options, if any.
    pub options: Option<&'static str>,
    /// Output file extension, without the dot.
    pub extension: &'static str,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Aws,
        Platform::Azure,
        Platform::DigitalOcean,
        Platform::Exoscale,
        Platform::IbmCloud,
        Platform::Nutanix,
        Platform::OpenStack,
    ];

    /// Image key in the descriptor and identifier passed to the tag tool.
    pub fn name(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::DigitalOcean => "digitalocean",
            Self::Exoscale => "exoscale",
            Self::IbmCloud => "ibmcloud",
            Self::Nutanix => "nutanix",
            Self::OpenStack => "openstack",
        }
    }

    pub fn format(self) -> PlatformFormat {
        match self {
            Self::Aws => PlatformFormat {
                format: "vmdk",
                options: Some("adapter_type=lsilogic,subformat=streamOptimized,compat6"),
                extension: "vmdk",
            },
            Self::Azure => PlatformFormat {
                format: "vpc",
                options: Some("force_size,subformat=fixed"),
                extension: "vhd",
            },
            Self::DigitalOcean => PlatformFormat {
                format: "raw",
                options: None,
                extension: "raw",
            },
            Self::Exoscale | Self::IbmCloud | Self::Nutanix | Self::OpenStack => PlatformFormat {
                format: "qcow2",
                options: None,
                extension: "qcow2",
            },
        }
    }

    /// Final filename for this platform derived from the qemu image filename.
    ///
    /// `fcos-39-qemu.x86_64.qcow2` becomes `fcos-39-azure.x86_64.vhd`;
    /// names without a `-qemu` tag get `-<platform>` appended to the stem.
    pub fn derived_filename(self, qemu_filename: &str) -> String {
        let ext = self.format().extension;
        let base = qemu_filename
            .strip_suffix(".qcow2")
            .unwrap_or(qemu_filename);
        if base.contains("-qemu") {
            let tagged = base.replacen("-qemu", &format!("-{}", self.name()), 1);
            format!("{tagged}.{ext}")
        } else {
            format!("{base}-{}.{ext}", self.name())
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                format!(
                    "unsupported platform '{}'; expected one of: {}",
                    s,
                    known.join(", ")
                )
            })
    }
}

/// Commit store the tag tool may read the deployed tree from.
#[derive(Debug, Clone, Copy)]
pub struct CommitRef<'a> {
    pub repo: &'a Path,
    pub commit: &'a str,
}

/// Copy `src` to `dst` with the platform identifier set for `platform`.
pub fn tag_platform(
    toolbox: &Toolbox,
    platform: Platform,
    src: &Path,
    dst: &Path,
    commit: Option<CommitRef<'_>>,
) -> Result<()> {
    let mut cmd = Cmd::new(&toolbox.platform_tag)
        .arg_path(src)
        .arg_path(dst)
        .arg(platform.name())
        .error_msg(format!("setting platform id '{platform}'"));
    if let Some(commit) = commit {
        cmd = cmd
            .env("OSTREE_REPO", commit.repo)
            .env("OSTREE_COMMIT", commit.commit);
    }
    cmd.run()?;
    Ok(())
}

/// Convert a qcow2 image at `src` into the platform's container format at `dst`.
pub fn convert(toolbox: &Toolbox, format: PlatformFormat, src: &Path, dst: &Path) -> Result<()> {
    let mut cmd = Cmd::new(&toolbox.qemu_img)
        .args(["convert", "-f", "qcow2", "-O", format.format]);
    if let Some(options) = format.options {
        cmd = cmd.args(["-o", options]);
    }
    cmd.arg_path(src)
        .arg_path(dst)
        .error_msg(format!("qemu-img convert to {}", format.format))
        .run()?;
    Ok(())
}
