//! `FilterTarget` implementations for AtoN nodes and messages.

use crate::filter::ast::FilterTarget;
use crate::model::aton::AtonNode;
use crate::model::message::Message;
use std::borrow::Cow;

/// AtoN fields: `id`, `uid`, `lat`, `lon`, `version`, `user`; any other
/// name is looked up as an OSM tag key.
impl FilterTarget for AtonNode {
    fn field_values(&self, field: &str) -> Vec<Cow<'_, str>> {
        match field {
            "id" => vec![Cow::Owned(self.id.to_string())],
            "uid" => self.uid().map(Cow::Borrowed).into_iter().collect(),
            "lat" => vec![Cow::Owned(self.lat.to_string())],
            "lon" => vec![Cow::Owned(self.lon.to_string())],
            "version" => vec![Cow::Owned(self.version.to_string())],
            "user" => self.user.as_deref().map(Cow::Borrowed).into_iter().collect(),
            key => self.tag(key).map(Cow::Borrowed).into_iter().collect(),
        }
    }
}

impl FilterTarget for Message {
    fn field_values(&self, field: &str) -> Vec<Cow<'_, str>> {
        match field {
            "id" => vec![Cow::Owned(self.id.to_string())],
            "status" => vec![Cow::Borrowed(self.status.as_str())],
            "type" => vec![Cow::Borrowed(self.message_type.as_str())],
            "main_type" => vec![Cow::Borrowed(self.main_type.as_str())],
            "series" => vec![Cow::Borrowed(self.series_id.as_str())],
            "mrn" => borrowed(self.mrn.as_deref()),
            "short_id" => borrowed(self.short_id.as_deref()),
            "number" => self
                .number
                .map(|number| Cow::Owned(number.to_string()))
                .into_iter()
                .collect(),
            "area" => all(&self.areas),
            "category" => all(&self.categories),
            "chart" => all(&self.charts),
            "aton" => all(&self.aton_uids),
            "title" => self
                .descs
                .iter()
                .filter_map(|desc| desc.title.as_deref())
                .map(Cow::Borrowed)
                .collect(),
            "lang" => self
                .descs
                .iter()
                .map(|desc| Cow::Borrowed(desc.lang.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn borrowed(value: Option<&str>) -> Vec<Cow<'_, str>> {
    value.map(Cow::Borrowed).into_iter().collect()
}

fn all(values: &[String]) -> Vec<Cow<'_, str>> {
    values.iter().map(|value| Cow::Borrowed(value.as_str())).collect()
}
