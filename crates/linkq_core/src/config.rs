use std::collections::HashMap;
use std::sync::LazyLock;

use linkq_error::{DbError, Result};

use crate::types::emitter::DEFAULT_SWEEP_INTERVAL;
use crate::values::Value;

pub const DEFAULT_INLINE_COLLECTION_MAX_LEN: usize = 32;

/// Configuration for translating and executing queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    pub inline_collection_max_len: usize,
    pub captured_as_variables: bool,
    pub evaluate_all_local_subtrees: bool,
    pub include_property_descriptors: bool,
    pub include_result_type_info: bool,
    pub emitter_sweep_interval: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            inline_collection_max_len: DEFAULT_INLINE_COLLECTION_MAX_LEN,
            captured_as_variables: true,
            evaluate_all_local_subtrees: false,
            include_property_descriptors: false,
            include_result_type_info: true,
            emitter_sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl QueryConfig {
    pub fn set_from_value(&mut self, name: &str, value: Value) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_value(&self, name: &str) -> Result<Value> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::new(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let def_conf = Self::default();
        let value = def_conf.get_as_value(name)?;
        self.set_from_value(name, value)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names and descriptions of all settings.
    pub fn settings() -> impl Iterator<Item = (&'static str, &'static str)> {
        GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
    }
}

struct SettingFunctions {
    description: &'static str,
    set: fn(value: Value, conf: &mut QueryConfig) -> Result<()>,
    get: fn(conf: &QueryConfig) -> Value,
}

impl SettingFunctions {
    const fn new<S: QuerySetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_value as _,
            get: S::get_as_value as _,
        }
    }
}

fn insert_setting<S: QuerySetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<InlineCollectionMaxLen>(&mut map);
    insert_setting::<CapturedAsVariables>(&mut map);
    insert_setting::<EvaluateAllLocalSubtrees>(&mut map);
    insert_setting::<IncludePropertyDescriptors>(&mut map);
    insert_setting::<IncludeResultTypeInfo>(&mut map);
    insert_setting::<EmitterSweepInterval>(&mut map);

    map
});

pub trait QuerySetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()>;
    fn get_as_value(conf: &QueryConfig) -> Value;
}

fn try_as_usize(value: &Value) -> Result<usize> {
    let v = value.try_as_i64()?;
    usize::try_from(v).map_err(|_| DbError::new(format!("Expected a non-negative value, got {v}")))
}

pub struct InlineCollectionMaxLen;

impl QuerySetting for InlineCollectionMaxLen {
    const NAME: &'static str = "inline_collection_max_len";
    const DESCRIPTION: &'static str =
        "Max length of a constant collection inlined into a query, longer collections are sent as variables";

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()> {
        conf.inline_collection_max_len = try_as_usize(&value)?;
        Ok(())
    }

    fn get_as_value(conf: &QueryConfig) -> Value {
        (conf.inline_collection_max_len as i64).into()
    }
}

pub struct CapturedAsVariables;

impl QuerySetting for CapturedAsVariables {
    const NAME: &'static str = "captured_as_variables";
    const DESCRIPTION: &'static str =
        "Send captured variables as named variables instead of inlined snapshots";

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()> {
        conf.captured_as_variables = value.try_as_bool()?;
        Ok(())
    }

    fn get_as_value(conf: &QueryConfig) -> Value {
        conf.captured_as_variables.into()
    }
}

pub struct EvaluateAllLocalSubtrees;

impl QuerySetting for EvaluateAllLocalSubtrees {
    const NAME: &'static str = "evaluate_all_local_subtrees";
    const DESCRIPTION: &'static str =
        "Pre-evaluate every locally evaluable sub-tree, not only those that can't be sent";

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()> {
        conf.evaluate_all_local_subtrees = value.try_as_bool()?;
        Ok(())
    }

    fn get_as_value(conf: &QueryConfig) -> Value {
        conf.evaluate_all_local_subtrees.into()
    }
}

pub struct IncludePropertyDescriptors;

impl QuerySetting for IncludePropertyDescriptors {
    const NAME: &'static str = "include_property_descriptors";
    const DESCRIPTION: &'static str = "Include property lists in descriptors of named record types";

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()> {
        conf.include_property_descriptors = value.try_as_bool()?;
        Ok(())
    }

    fn get_as_value(conf: &QueryConfig) -> Value {
        conf.include_property_descriptors.into()
    }
}

pub struct IncludeResultTypeInfo;

impl QuerySetting for IncludeResultTypeInfo {
    const NAME: &'static str = "include_result_type_info";
    const DESCRIPTION: &'static str = "Attach type descriptors to objects in query results";

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()> {
        conf.include_result_type_info = value.try_as_bool()?;
        Ok(())
    }

    fn get_as_value(conf: &QueryConfig) -> Value {
        conf.include_result_type_info.into()
    }
}

pub struct EmitterSweepInterval;

impl QuerySetting for EmitterSweepInterval {
    const NAME: &'static str = "emitter_sweep_interval";
    const DESCRIPTION: &'static str = "Number of emitted type lookups between sweeps of dead types";

    fn set_from_value(value: Value, conf: &mut QueryConfig) -> Result<()> {
        let val = try_as_usize(&value)?;
        if val == 0 {
            return Err(DbError::new("Sweep interval must be at least 1"));
        }
        conf.emitter_sweep_interval = val;
        Ok(())
    }

    fn get_as_value(conf: &QueryConfig) -> Value {
        (conf.emitter_sweep_interval as i64).into()
    }
}
