//! Text rendering of volume notifications for `watch`

use handlebars::Handlebars;
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};
use crate::events::EventMask;
use crate::volume::VolumeChangeInfo;

const CUSTOM_TEMPLATE: &str = "custom";

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    ("mounted", "[{{time}}] mounted   {{label}} ({{device_path}}) at {{mount_point}}"),
    (
        "unmounted",
        "[{{time}}] unmounted {{label}} ({{device_path}}){{#if daemon_initiated}} by the daemon{{/if}}",
    ),
    ("attached", "[{{time}}] attached  {{label}} ({{device_path}}, {{media}})"),
    ("removed", "[{{time}}] removed   {{label}} ({{device_path}})"),
    ("media-inserted", "[{{time}}] inserted  {{media}} {{label}} ({{device_path}})"),
    ("unknown", "[{{time}}] event {{event}} on {{device}}"),
];

pub struct NotificationFormatter {
    handlebars: Handlebars<'static>,
    custom: bool,
}

impl NotificationFormatter {
    /// Formatter with one built-in template per event
    pub fn new() -> AppResult<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        for (name, template) in DEFAULT_TEMPLATES {
            handlebars
                .register_template_string(name, *template)
                .map_err(|e| AppError::template_with_source(format!("Invalid template '{name}'"), e))?;
        }

        Ok(NotificationFormatter {
            handlebars,
            custom: false,
        })
    }

    /// Formatter rendering every event through `template`
    pub fn with_template(template: &str) -> AppResult<Self> {
        let mut formatter = Self::new()?;
        formatter
            .handlebars
            .register_template_string(CUSTOM_TEMPLATE, template)
            .map_err(|e| AppError::template_with_source("Invalid --format template", e))?;
        formatter.custom = true;
        Ok(formatter)
    }

    fn template_data(info: &VolumeChangeInfo) -> Value {
        json!({
            "event": info.event().name(),
            "device": info.device,
            "label": info.label,
            "mount_point": info.mount_point,
            "device_path": info.device_path,
            "daemon_initiated": info.daemon_initiated,
            "media": info.media.to_string(),
            "time": info.timestamp.format("%H:%M:%S").to_string(),
            "timestamp": info.timestamp.to_rfc3339(),
        })
    }

    pub fn render(&self, info: &VolumeChangeInfo) -> AppResult<String> {
        let name = if self.custom {
            CUSTOM_TEMPLATE
        } else {
            let event = info.event();
            if EventMask::EVENTS.contains(&event) {
                event.name()
            } else {
                "unknown"
            }
        };

        self.handlebars
            .render(name, &Self::template_data(info))
            .map_err(|e| AppError::template_with_source(format!("Failed to render '{name}'"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{MediaKind, Volume};

    fn mounted_info() -> VolumeChangeInfo {
        let mut volume = Volume::new("udi-a", "/dev/sdb1", "USB", MediaKind::Filesystem);
        volume.mark_mounted("/media/USB").unwrap();
        volume.change_info(EventMask::VOLUME_MOUNTED)
    }

    #[test]
    fn test_default_templates() {
        let formatter = NotificationFormatter::new().unwrap();
        let line = formatter.render(&mounted_info()).unwrap();
        assert!(line.contains("mounted"));
        assert!(line.contains("USB (/dev/sdb1) at /media/USB"));
    }

    #[test]
    fn test_custom_template() {
        let formatter = NotificationFormatter::with_template("{{event}} {{device}} {{mount_point}}").unwrap();
        assert_eq!(
            formatter.render(&mounted_info()).unwrap(),
            "mounted udi-a /media/USB"
        );
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        assert!(matches!(
            NotificationFormatter::with_template("{{#if}}"),
            Err(AppError::Template { .. })
        ));
    }
}
