// The channel map carries the experimenter's view of the crate:
// [module, channel] -> Identifier(type, subtype, location, damm id, tags)
// Every physical channel that can appear in the data must have a row,
// because an unmapped channel is a configuration mistake we want to hear
// about, never a silent default.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;

use super::constants::NUMBER_OF_CHANNELS;
use super::error::ChannelMapError;

/// Minimum columns in a map row (module, channel, type, subtype, location, damm id).
const MIN_ENTRIES_PER_LINE: usize = 6;
/// Rows may carry one extra column of semicolon separated tags.
const TAGGED_ENTRIES_PER_LINE: usize = 7;

/// Pack a (module, channel) pair into the key used by every per-channel map.
pub fn generate_uuid(module: u32, channel: u32) -> u32 {
    module * NUMBER_OF_CHANNELS as u32 + channel
}

/// Load the default map for windows
#[cfg(target_family = "windows")]
fn load_default_map() -> String {
    String::from(include_str!("data\\default_channel_map.csv"))
}

/// Load the default map for macos and linux
#[cfg(target_family = "unix")]
fn load_default_map() -> String {
    String::from(include_str!("data/default_channel_map.csv"))
}

/// What a channel physically is: detector type and subtype, the location
/// index used for bar pairing, the histogram id, and free-form tags such as
/// "left" or "right".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identifier {
    pub detector_type: String,
    pub subtype: String,
    pub location: u32,
    pub damm_id: u32,
    pub tags: Vec<String>,
}

impl Identifier {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Two detector ends share one bar; locations are assigned in
    /// left/right pairs.
    pub fn bar_number(&self) -> u32 {
        self.location / 2
    }
}

/// ChannelMap resolves (module, channel) to an [`Identifier`].
///
/// The map changes from experiment to experiment, so it reads a CSV file
/// where each row is `module,channel,type,subtype,location,damm_id[,tags]`
/// with tags separated by semicolons. The first row is a header and is
/// skipped.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    map: FxHashMap<u32, Identifier>,
}

impl ChannelMap {
    /// Create a new ChannelMap
    /// If the path is None, we load the default that is bundled with the library
    pub fn new(path: Option<&Path>) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_map();
        }

        let mut cm = ChannelMap::default();

        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(",").collect();
            if entries.len() < MIN_ENTRIES_PER_LINE || entries.len() > TAGGED_ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat);
            }

            let module: u32 = entries[0].parse()?;
            let channel: u32 = entries[1].parse()?;
            let tags = if entries.len() == TAGGED_ENTRIES_PER_LINE {
                entries[6]
                    .split_terminator(";")
                    .map(|t| t.trim().to_string())
                    .collect()
            } else {
                Vec::new()
            };

            let id = Identifier {
                detector_type: entries[2].trim().to_string(),
                subtype: entries[3].trim().to_string(),
                location: entries[4].parse()?,
                damm_id: entries[5].parse()?,
                tags,
            };
            cm.map.insert(generate_uuid(module, channel), id);
        }

        Ok(cm)
    }

    /// Resolve a (module, channel) pair, erroring for unmapped channels.
    pub fn identifier(&self, module: u32, channel: u32) -> Result<&Identifier, ChannelMapError> {
        self.map
            .get(&generate_uuid(module, channel))
            .ok_or(ChannelMapError::UnknownChannel(module, channel))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map() {
        let map = ChannelMap::new(None).unwrap();
        let id = map.identifier(0, 0).unwrap();
        assert_eq!(id.detector_type, "vandle");
        assert_eq!(id.subtype, "medium");
        assert_eq!(id.location, 0);
        assert!(id.has_tag("left"));
        assert_eq!(id.bar_number(), 0);

        let partner = map.identifier(0, 1).unwrap();
        assert!(partner.has_tag("right"));
        assert_eq!(partner.bar_number(), 0);
    }

    #[test]
    fn test_unknown_channel_is_error() {
        let map = ChannelMap::new(None).unwrap();
        assert!(matches!(
            map.identifier(13, 15),
            Err(ChannelMapError::UnknownChannel(13, 15))
        ));
    }

    #[test]
    fn test_uuid_packing() {
        assert_eq!(generate_uuid(0, 0), 0);
        assert_eq!(generate_uuid(0, 15), 15);
        assert_eq!(generate_uuid(2, 3), 35);
    }
}
