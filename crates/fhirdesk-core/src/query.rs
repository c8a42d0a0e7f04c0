//! 列表过滤与排序
//!
//! 每种资源通过一张属性查找表暴露可过滤/排序的字段，
//! 过滤与排序共用同一张表，均为纯函数。

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{FhirResource, Media, Observation, Patient};

/// 属性查找表中的一项
pub struct Attribute<T> {
    pub key: &'static str,
    pub get: fn(&T) -> Option<&str>,
}

/// 可被过滤/排序的资源
pub trait Searchable: Sized + 'static {
    fn attributes() -> &'static [Attribute<Self>];

    /// 列表视图的初始过滤/排序参数
    fn default_query() -> ListQuery {
        ListQuery::default()
    }
}

fn creation_date<T: FhirResource>(resource: &T) -> Option<&str> {
    resource.id()
}

fn identifier<T: FhirResource>(resource: &T) -> Option<&str> {
    resource.identifier_value()
}

fn observation_status(observation: &Observation) -> Option<&str> {
    observation.status.as_ref().map(|s| s.as_str())
}

fn observation_code(observation: &Observation) -> Option<&str> {
    observation.code.as_ref().and_then(|c| c.first_code())
}

fn observation_body_site(observation: &Observation) -> Option<&str> {
    observation.body_site.as_ref().and_then(|c| c.first_code())
}

fn media_status(media: &Media) -> Option<&str> {
    media.status.as_ref().map(|s| s.as_str())
}

fn media_body_site(media: &Media) -> Option<&str> {
    media.body_site.as_ref().and_then(|c| c.first_code())
}

fn patient_birth_date(patient: &Patient) -> Option<&str> {
    patient.birth_date.as_deref()
}

static PATIENT_ATTRIBUTES: [Attribute<Patient>; 5] = [
    Attribute { key: "identifier", get: identifier::<Patient> },
    Attribute { key: "name", get: Patient::given_name },
    Attribute { key: "family", get: Patient::family_name },
    Attribute { key: "birthDate", get: patient_birth_date },
    Attribute { key: "creationDate", get: creation_date::<Patient> },
];

static OBSERVATION_ATTRIBUTES: [Attribute<Observation>; 6] = [
    Attribute { key: "identifier", get: identifier::<Observation> },
    Attribute { key: "status", get: observation_status },
    Attribute { key: "code", get: observation_code },
    Attribute { key: "dateTime", get: Observation::date_time },
    Attribute { key: "bodySite", get: observation_body_site },
    Attribute { key: "creationDate", get: creation_date::<Observation> },
];

static MEDIA_ATTRIBUTES: [Attribute<Media>; 4] = [
    Attribute { key: "identifier", get: identifier::<Media> },
    Attribute { key: "status", get: media_status },
    Attribute { key: "bodySite", get: media_body_site },
    Attribute { key: "creationDate", get: creation_date::<Media> },
];

impl Searchable for Patient {
    fn attributes() -> &'static [Attribute<Self>] {
        &PATIENT_ATTRIBUTES
    }
}

impl Searchable for Observation {
    fn attributes() -> &'static [Attribute<Self>] {
        &OBSERVATION_ATTRIBUTES
    }

    fn default_query() -> ListQuery {
        ListQuery::new("code", "dateTime")
    }
}

impl Searchable for Media {
    fn attributes() -> &'static [Attribute<Self>] {
        &MEDIA_ATTRIBUTES
    }

    fn default_query() -> ListQuery {
        ListQuery::new("identifier", "creationDate")
    }
}

/// 只用于排序、不参与过滤的属性键
const SORT_ONLY_KEYS: [&str; 1] = ["creationDate"];

/// 查找属性访问器，未识别的键返回None
pub fn lookup<T: Searchable>(key: &str) -> Option<fn(&T) -> Option<&str>> {
    T::attributes().iter().find(|a| a.key == key).map(|a| a.get)
}

/// 资源支持的全部属性键
pub fn keys<T: Searchable>() -> Vec<&'static str> {
    T::attributes().iter().map(|a| a.key).collect()
}

/// 按属性做大小写不敏感的子串过滤
///
/// 属性缺失的条目被排除；未识别的键与 `creationDate` 返回空列表。
pub fn filter<T: Searchable + Clone>(items: &[T], key: &str, search_text: &str) -> Vec<T> {
    let get = lookup::<T>(key).filter(|_| !SORT_ONLY_KEYS.contains(&key));
    let Some(get) = get else {
        debug!("Unrecognized filter attribute: {}", key);
        return Vec::new();
    };

    let needle = search_text.to_lowercase();
    items
        .iter()
        .filter(|&item| get(item).is_some_and(|value| value.to_lowercase().contains(&needle)))
        .cloned()
        .collect()
}

/// 按属性做升序字典序原地排序
///
/// 先按忽略大小写的值比较，相同时再按原始字节序区分。
/// 只有属性已定义的条目参与排序，并在它们原有的位置之间重新排列；
/// 属性缺失的条目保持原位。未识别的键不做任何改动。
pub fn sort<T: Searchable>(items: &mut [T], key: &str) {
    let Some(get) = lookup::<T>(key) else {
        debug!("Unrecognized sort attribute: {}", key);
        return;
    };

    let slots: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| get(*item).is_some())
        .map(|(index, _)| index)
        .collect();

    let mut order = slots.clone();
    order.sort_by_cached_key(|index| {
        let value = get(&items[*index]).unwrap_or_default();
        (value.to_lowercase(), value.to_string())
    });

    // source[i]: 排序后位置i上应放置的原始下标
    let mut source: Vec<usize> = (0..items.len()).collect();
    for (slot, from) in slots.iter().zip(order.iter()) {
        source[*slot] = *from;
    }

    let mut visited = vec![false; items.len()];
    for start in 0..items.len() {
        if visited[start] {
            continue;
        }
        let mut current = start;
        loop {
            visited[current] = true;
            let from = source[current];
            if from == start {
                break;
            }
            items.swap(current, from);
            current = from;
        }
    }
}

/// 列表视图的过滤/排序参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filter_attribute: String,
    pub search_text: String,
    pub sort_attribute: String,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter_attribute: "name".to_string(),
            search_text: String::new(),
            sort_attribute: "creationDate".to_string(),
        }
    }
}

impl ListQuery {
    pub fn new(filter_attribute: &str, sort_attribute: &str) -> Self {
        Self {
            filter_attribute: filter_attribute.to_string(),
            search_text: String::new(),
            sort_attribute: sort_attribute.to_string(),
        }
    }

    pub fn with_search_text(mut self, search_text: impl Into<String>) -> Self {
        self.search_text = search_text.into();
        self
    }

    /// 先过滤后排序
    pub fn apply<T: Searchable + Clone>(&self, items: &[T]) -> Vec<T> {
        let mut rows = filter(items, &self.filter_attribute, &self.search_text);
        sort(&mut rows, &self.sort_attribute);
        rows
    }
}
