use diesel::table;

table! {
    guild_configs (id) {
        id -> Integer,
        guild_id -> BigInt,
        guild_name -> Text,
        features -> Text,
        settings -> Nullable<Text>,
        is_initialized -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

table! {
    language_channel_bindings (id) {
        id -> Integer,
        guild_id -> BigInt,
        language_code -> Text,
        language_name -> Text,
        channel_id -> BigInt,
        is_active -> Bool,
        created_at -> Text,
    }
}

table! {
    message_mappings (id) {
        id -> Integer,
        guild_id -> BigInt,
        original_message_id -> BigInt,
        original_channel_id -> BigInt,
        translated_messages -> Text,
        original_content -> Nullable<Text>,
        created_at -> Text,
    }
}

table! {
    usage_records (id) {
        id -> Integer,
        guild_id -> BigInt,
        feature -> Text,
        usage_count -> BigInt,
        cost_usd -> Double,
        date -> Text,
        created_at -> Text,
    }
}
