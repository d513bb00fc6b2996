use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::MAX_UNSIGNED;
use crate::lang::value::Value;

/// Per-scope literal table. Structurally equal values share one slot.
#[derive(Debug, Default, Clone)]
pub struct ConstantPool {
    values: Vec<Value>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of an existing entry equal to `value`, without inserting.
    pub fn find(&self, value: &Value) -> Option<u32> {
        self.values
            .iter()
            .position(|v| v.same_as(value))
            .map(|i| i as u32)
    }

    /// Index of `value`, inserting it when not yet present.
    pub fn add(&mut self, value: Value) -> Result<u32, CompileError> {
        if let Some(index) = self.find(&value) {
            return Ok(index);
        }
        let index = self.values.len();
        if index > MAX_UNSIGNED as usize {
            return Err(CompileError::overflow(
                "constant pool",
                index as i64,
                MAX_UNSIGNED as i64,
            ));
        }
        self.values.push(value);
        Ok(index as u32)
    }

    /// Intern a property, member or global name.
    pub fn add_name(&mut self, name: &str) -> Result<u32, CompileError> {
        match self.find_name(name) {
            Some(index) => Ok(index),
            None => self.add(Value::String(name.to_string())),
        }
    }

    /// Whether `name` is already a string constant of this scope.
    pub fn find_name(&self, name: &str) -> Option<u32> {
        self.values
            .iter()
            .position(|v| matches!(v, Value::String(s) if s == name))
            .map(|i| i as u32)
    }

    pub fn get(&self, index: u32) -> Option<&Value> {
        self.values.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_strings_share_one_slot() {
        let mut pool = ConstantPool::new();
        let a = pool.add(Value::String("x".into())).unwrap();
        let b = pool.add(Value::String("x".into())).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_distinct_kinds_do_not_merge() {
        let mut pool = ConstantPool::new();
        let i = pool.add(Value::Integer(1)).unwrap();
        let r = pool.add(Value::Real(1.0)).unwrap();
        let s = pool.add(Value::String("1".into())).unwrap();
        assert_eq!((i, r, s), (0, 1, 2));
    }

    #[test]
    fn test_nan_deduplicates() {
        let mut pool = ConstantPool::new();
        pool.add(Value::Real(f64::NAN)).unwrap();
        pool.add(Value::Real(f64::NAN)).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_name_lookup_does_not_insert() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.find_name("length"), None);
        assert!(pool.is_empty());

        let idx = pool.add_name("length").unwrap();
        assert_eq!(pool.find_name("length"), Some(idx));
        assert_eq!(pool.add(Value::String("length".into())).unwrap(), idx);
        assert_eq!(pool.get(idx), Some(&Value::String("length".into())));
    }

    #[test]
    fn test_structured_constants() {
        let mut pool = ConstantPool::new();
        let arr = || Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let a = pool.add(arr()).unwrap();
        let b = pool.add(arr()).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.into_values().len(), 1);
    }
}
