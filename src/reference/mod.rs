//! Static reference tables for common deliverable image sizes, plus the
//! preset lookup the `generate` command uses to target them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconSpec {
    pub name: &'static str,
    pub size: u32,
    pub purpose: &'static str,
}

pub const FAVICON_SIZES: &[IconSpec] = &[
    IconSpec { name: "favicon-16", size: 16, purpose: "browser tab" },
    IconSpec { name: "favicon-32", size: 32, purpose: "taskbar shortcut" },
    IconSpec { name: "favicon-48", size: 48, purpose: "desktop shortcut" },
    IconSpec { name: "favicon-64", size: 64, purpose: "high-DPI tab" },
    IconSpec { name: "favicon-96", size: 96, purpose: "Google TV" },
    IconSpec { name: "favicon-128", size: 128, purpose: "Chrome Web Store" },
    IconSpec { name: "apple-touch-icon", size: 180, purpose: "iOS home screen" },
    IconSpec { name: "android-chrome-192", size: 192, purpose: "Android home screen" },
    IconSpec { name: "android-chrome-512", size: 512, purpose: "PWA splash screen" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocialImageSpec {
    pub platform: &'static str,
    pub kind: &'static str,
    pub width: u32,
    pub height: u32,
    /// Closest aspect-ratio string accepted by the image providers.
    pub aspect_ratio: &'static str,
}

pub const SOCIAL_IMAGE_SIZES: &[SocialImageSpec] = &[
    SocialImageSpec { platform: "opengraph", kind: "card", width: 1200, height: 630, aspect_ratio: "16:9" },
    SocialImageSpec { platform: "twitter", kind: "card", width: 1200, height: 675, aspect_ratio: "16:9" },
    SocialImageSpec { platform: "twitter", kind: "header", width: 1500, height: 500, aspect_ratio: "21:9" },
    SocialImageSpec { platform: "instagram", kind: "post", width: 1080, height: 1080, aspect_ratio: "1:1" },
    SocialImageSpec { platform: "instagram", kind: "portrait", width: 1080, height: 1350, aspect_ratio: "4:5" },
    SocialImageSpec { platform: "instagram", kind: "story", width: 1080, height: 1920, aspect_ratio: "9:16" },
    SocialImageSpec { platform: "facebook", kind: "post", width: 1200, height: 630, aspect_ratio: "16:9" },
    SocialImageSpec { platform: "facebook", kind: "cover", width: 820, height: 312, aspect_ratio: "21:9" },
    SocialImageSpec { platform: "youtube", kind: "thumbnail", width: 1280, height: 720, aspect_ratio: "16:9" },
    SocialImageSpec { platform: "youtube", kind: "banner", width: 2560, height: 1440, aspect_ratio: "16:9" },
    SocialImageSpec { platform: "linkedin", kind: "post", width: 1200, height: 627, aspect_ratio: "16:9" },
    SocialImageSpec { platform: "linkedin", kind: "banner", width: 1584, height: 396, aspect_ratio: "21:9" },
    SocialImageSpec { platform: "pinterest", kind: "pin", width: 1000, height: 1500, aspect_ratio: "2:3" },
];

impl SocialImageSpec {
    pub fn preset_name(&self) -> String {
        format!("{}-{}", self.platform, self.kind)
    }
}

/// Looks up a generate preset by `platform-kind` name, e.g. `instagram-story`.
pub fn find_preset(name: &str) -> Option<&'static SocialImageSpec> {
    let wanted = name.trim().to_lowercase();
    SOCIAL_IMAGE_SIZES
        .iter()
        .find(|spec| spec.preset_name() == wanted)
}

pub fn find_icon(name: &str) -> Option<&'static IconSpec> {
    let wanted = name.trim().to_lowercase();
    FAVICON_SIZES.iter().find(|spec| spec.name == wanted)
}

pub fn preset_names() -> Vec<String> {
    SOCIAL_IMAGE_SIZES
        .iter()
        .map(|spec| spec.preset_name())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_presets_case_insensitively() {
        let spec = find_preset("Instagram-Story").unwrap();
        assert_eq!((spec.width, spec.height), (1080, 1920));
        assert_eq!(spec.aspect_ratio, "9:16");
        assert!(find_preset("myspace-banner").is_none());
    }

    #[test]
    fn preset_names_are_unique() {
        let mut names = preset_names();
        names.sort();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn favicon_table_is_sorted_by_size() {
        let sizes: Vec<u32> = FAVICON_SIZES.iter().map(|spec| spec.size).collect();
        let mut sorted = sizes.clone();
        sorted.sort_unstable();
        assert_eq!(sizes, sorted);
    }
}
