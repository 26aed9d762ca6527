// Diesel table definitions backing the `store` collaborator traits.
//
// Kept minimal and intentionally unused by any concrete implementation in
// this crate (see `store.rs`); it exists so a production `ActorDb` /
// `ShortTermMemoryDb` implementation has the schema vocabulary ready, the
// same role the teacher's generated `schema.rs` plays for its own rows.

diesel::table! {
    use diesel::sql_types::*;

    actors (id) {
        id -> Uuid,
        user_id -> Text,
        name -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    short_term_memory (id) {
        id -> Uuid,
        actor_id -> Uuid,
        kind -> Text,
        name -> Text,
        content -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use pgvector::sql_types::Vector;

    long_term_memory (id) {
        id -> Uuid,
        actor_id -> Uuid,
        summary -> Text,
        embedding -> Nullable<Vector>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(short_term_memory -> actors (actor_id));
diesel::joinable!(long_term_memory -> actors (actor_id));

diesel::allow_tables_to_appear_in_same_query!(actors, short_term_memory, long_term_memory,);
