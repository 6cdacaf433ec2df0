//! Text helpers for the `ota.xml` manifest.
//!
//! The manifest is written as plain text. A patch manifest is the new
//! manifest with the old firmware version inserted as the first child of
//! `<ota_firmware>`, renamed to `<old_firmware_version>`.

use crate::error::{Error, Result};
use crate::version::FirmwareVersion;

const ROOT_TAG: &str = "<ota_firmware>";
const VERSION_OPEN: &str = "<firmware_version>";
const VERSION_CLOSE: &str = "</firmware_version>";

/// Escapes `&`, `<` and `>` for element text.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Renders a version element named `tag`, one tab deep, with its trailing
/// newline.
pub fn version_element(tag: &str, version: &FirmwareVersion) -> String {
    format!(
        "\t<{tag}>\n\
         \t\t<version_name>{}</version_name>\n\
         \t\t<version_code>{:#x}</version_code>\n\
         \t\t<board_name>{}</board_name>\n\
         \t</{tag}>\n",
        escape(&version.version_name),
        version.version_code,
        escape(&version.board_name),
    )
}

/// Returns `new_xml` with the old firmware version prepended inside
/// `<ota_firmware>`.
///
/// The block is taken from the `<firmware_version>` element of `old_xml`.
/// When the old manifest has none, it is rendered from `old_version`.
///
/// # Errors
///
/// [`Error::InvalidManifest`] when `new_xml` has no `<ota_firmware>` element.
pub fn prepend_old_version(
    new_xml: &str,
    old_xml: &str,
    old_version: &FirmwareVersion,
) -> Result<String> {
    let at = new_xml
        .find(ROOT_TAG)
        .map(|pos| pos + ROOT_TAG.len())
        .ok_or_else(|| Error::InvalidManifest(format!("no {ROOT_TAG} element")))?;

    let block = match firmware_version_body(old_xml) {
        Some(body) => format!("\t<old_firmware_version>{body}</old_firmware_version>\n"),
        None => {
            warn!("old ota.xml has no {VERSION_OPEN}, using the image header");
            version_element("old_firmware_version", old_version)
        }
    };

    let (head, tail) = new_xml.split_at(at);
    let tail = tail.strip_prefix('\n').unwrap_or(tail);
    Ok(format!("{head}\n{block}{tail}"))
}

fn firmware_version_body(xml: &str) -> Option<&str> {
    let start = xml.find(VERSION_OPEN)? + VERSION_OPEN.len();
    let len = xml[start..].find(VERSION_CLOSE)?;
    Some(&xml[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(version: &FirmwareVersion) -> String {
        format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n<ota_firmware>\n{}\t<partitions/>\n</ota_firmware>\n",
            version_element("firmware_version", version)
        )
    }

    #[test]
    fn test_old_version_goes_first() {
        let old = FirmwareVersion::new("v1", "evb", 1);
        let new = FirmwareVersion::new("v2", "evb", 2);
        let xml = prepend_old_version(&manifest(&new), &manifest(&old), &old).unwrap();

        let expected = format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n<ota_firmware>\n{}{}\t<partitions/>\n</ota_firmware>\n",
            version_element("old_firmware_version", &old),
            version_element("firmware_version", &new),
        );
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_old_block_copied_verbatim() {
        let old_xml = "<ota_firmware><firmware_version><version_code>0x7</version_code>\
                       <extra>kept</extra></firmware_version></ota_firmware>";
        let fallback = FirmwareVersion::new("other", "x", 99);
        let xml = prepend_old_version("<ota_firmware></ota_firmware>", old_xml, &fallback).unwrap();
        assert_eq!(
            xml,
            "<ota_firmware>\n\t<old_firmware_version><version_code>0x7</version_code>\
             <extra>kept</extra></old_firmware_version>\n</ota_firmware>"
        );
    }

    #[test]
    fn test_old_block_from_header() {
        let old = FirmwareVersion::new("a&b", "evb", 0x10);
        let xml = prepend_old_version("<ota_firmware>\n</ota_firmware>\n", "<ota/>", &old).unwrap();
        assert!(xml.contains("<old_firmware_version>\n\t\t<version_name>a&amp;b</version_name>"));
        assert!(xml.contains("<version_code>0x10</version_code>"));
    }

    #[test]
    fn test_new_manifest_without_root() {
        let old = FirmwareVersion::default();
        assert!(matches!(
            prepend_old_version("<ota/>", "<ota/>", &old),
            Err(Error::InvalidManifest(_))
        ));
    }
}
