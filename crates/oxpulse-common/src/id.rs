use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// 初始化 Snowflake ID 生成器
///
/// `machine_id`: 机器标识 (0-31)
/// `node_id`: 节点标识 (0-31)
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// 生成一个 Snowflake ID（十进制字符串形式）
///
/// 未调用 [`init`] 时使用 `(1, 1)` 生成器。
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap_or_else(|e| e.into_inner());
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
