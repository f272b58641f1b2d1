use database::{PopulateSpec, Projection, Sort};
use mongodb::bson::Document as BsonDocument;
use serde::Deserialize;

/// Options accepted by [`DocumentRepository::find`](crate::DocumentRepository::find).
///
/// Every field is optional. Unset flags resolve to `lean = false`,
/// `count = false` and `multiple = true`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FindOptions {
    pub select: Option<Projection>,
    pub populate: Option<PopulateSpec>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub sort: Option<Sort>,
    pub lean: Option<bool>,
    pub count: Option<bool>,
    pub multiple: Option<bool>,
}

impl FindOptions {
    pub fn is_lean(&self) -> bool {
        self.lean.unwrap_or(false)
    }

    pub fn is_count(&self) -> bool {
        self.count.unwrap_or(false)
    }

    pub fn is_multiple(&self) -> bool {
        self.multiple.unwrap_or(true)
    }

    /// Overrides every field that is set in `overrides`.
    pub fn merge(&mut self, overrides: FindOptions) -> &mut Self {
        let FindOptions {
            select,
            populate,
            limit,
            skip,
            sort,
            lean,
            count,
            multiple,
        } = overrides;

        self.select = select.or(self.select.take());
        self.populate = populate.or(self.populate.take());
        self.limit = limit.or(self.limit);
        self.skip = skip.or(self.skip);
        self.sort = sort.or(self.sort.take());
        self.lean = lean.or(self.lean);
        self.count = count.or(self.count);
        self.multiple = multiple.or(self.multiple);
        self
    }
}

/// Shallow merge of untyped option maps: keys of `overrides` win.
pub fn merge_documents(base: &mut BsonDocument, overrides: BsonDocument) -> &mut BsonDocument {
    for (key, value) in overrides {
        base.insert(key, value);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{self, doc};

    #[test]
    fn test_merge_documents_overrides_on_collision() {
        let mut base = doc! { "a": 1, "b": 2 };

        merge_documents(&mut base, doc! { "b": 3, "c": 4 });

        assert_eq!(base, doc! { "a": 1, "b": 3, "c": 4 });
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut base = FindOptions {
            limit: Some(10),
            lean: Some(true),
            select: Some(Projection::include(["name"])),
            ..Default::default()
        };

        base.merge(FindOptions {
            limit: Some(2),
            skip: Some(4),
            ..Default::default()
        });

        assert_eq!(base.limit, Some(2));
        assert_eq!(base.skip, Some(4));
        assert!(base.is_lean());
        assert_eq!(base.select, Some(Projection::include(["name"])));
    }

    #[test]
    fn test_defaults() {
        let options = FindOptions::default();

        assert!(!options.is_lean());
        assert!(!options.is_count());
        assert!(options.is_multiple());
    }

    #[test]
    fn test_deserialize_from_bson() {
        let options: FindOptions = bson::from_document(doc! {
            "select": "name -_id",
            "populate": [{ "path": "friends", "populate": "friends" }, "team"],
            "limit": 5,
            "sort": { "name": -1 },
            "lean": true,
        })
        .unwrap();

        assert_eq!(options.limit, Some(5));
        assert_eq!(options.sort, Some(Sort::new().desc("name")));
        assert_eq!(
            options.populate,
            Some(PopulateSpec::Sequence(vec![
                PopulateSpec::nested("friends", Some("friends".into())),
                "team".into(),
            ]))
        );
        assert!(options.is_lean());
        assert!(options.is_multiple());
    }

    #[test]
    fn test_deserialize_rejects_unrecognized_populate() {
        let result = bson::from_document::<FindOptions>(doc! { "populate": 7 });

        assert!(result.is_err());
    }
}
